//! Reply waiter lifecycle.
//!
//! ```text
//! Idle ──subscribe──→ Subscribed ──┬──→ Matched
//!                                  ├──→ TimedOut
//!                                  ├──→ Cancelled
//!                                  └──→ Failed
//! ```

use std::fmt;

use matrx_types::RenderReply;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterState {
    Idle,
    Subscribed,
    Matched,
    TimedOut,
    Cancelled,
    Failed,
}

impl WaiterState {
    /// Terminal states release the subscription and cannot wait again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Idle | Self::Subscribed)
    }
}

impl fmt::Display for WaiterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Subscribed => "subscribed",
            Self::Matched => "matched",
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        })
    }
}

/// Non-error end of a wait.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Reply(RenderReply),
    Cancelled,
}

impl WaitOutcome {
    pub fn reply(&self) -> Option<&RenderReply> {
        match self {
            Self::Reply(reply) => Some(reply),
            Self::Cancelled => None,
        }
    }

    pub fn into_reply(self) -> Option<RenderReply> {
        match self {
            Self::Reply(reply) => Some(reply),
            Self::Cancelled => None,
        }
    }
}
