//! Reply matching.
//!
//! A reply's correlation id is read from the message property first and the
//! body field second.

use std::fmt;
use std::str::FromStr;

use matrx_types::{CorrelationId, RenderReply};

use crate::error::ReplyRejection;

/// How strictly a waiter ties replies to its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyMatching {
    /// The reply must carry the expected correlation id.
    Strict,
    /// A reply with a different id is skipped; one without any id is
    /// accepted. Assumes at most one request in flight per device.
    #[default]
    AllowUncorrelated,
    /// The first parsable reply wins.
    Disabled,
}

impl FromStr for ReplyMatching {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" | "allow_uncorrelated" | "allow-uncorrelated" => Ok(Self::AllowUncorrelated),
            "off" | "disabled" | "none" => Ok(Self::Disabled),
            other => Err(format!("unknown reply matching mode '{other}'")),
        }
    }
}

impl fmt::Display for ReplyMatching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "strict",
            Self::AllowUncorrelated => "lenient",
            Self::Disabled => "off",
        })
    }
}

/// What to do with a reply that belongs to another request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleReplyPolicy {
    /// Nack with requeue so its own waiter can still take it.
    #[default]
    Requeue,
    /// Acknowledge and drop.
    Discard,
}

impl FromStr for StaleReplyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "requeue" => Ok(Self::Requeue),
            "discard" | "drop" => Ok(Self::Discard),
            other => Err(format!("unknown stale reply policy '{other}'")),
        }
    }
}

/// Result of inspecting one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept(RenderReply),
    Reject(ReplyRejection),
}

/// Decide whether a delivery answers the request identified by `expected`.
pub fn evaluate_reply(
    matching: ReplyMatching,
    expected: Option<&CorrelationId>,
    property: Option<&str>,
    body: &[u8],
) -> Verdict {
    let reply = match RenderReply::from_json_slice(body) {
        Ok(reply) => reply,
        Err(e) => return Verdict::Reject(ReplyRejection::Malformed(e.to_string())),
    };

    let Some(expected) = expected else {
        return Verdict::Accept(reply);
    };
    if matching == ReplyMatching::Disabled {
        return Verdict::Accept(reply);
    }

    let actual = property
        .map(CorrelationId::from_wire)
        .or_else(|| reply.correlation_id.clone());

    match actual {
        Some(actual) if &actual == expected => Verdict::Accept(reply),
        Some(actual) => Verdict::Reject(ReplyRejection::CorrelationMismatch {
            expected: expected.clone(),
            actual,
        }),
        None if matching == ReplyMatching::Strict => {
            Verdict::Reject(ReplyRejection::MissingCorrelation {
                expected: expected.clone(),
            })
        }
        None => Verdict::Accept(reply),
    }
}
