//! Render client error types.
//!
//! Every failure names the device it concerns and, once one exists, the
//! correlation id of the request. Nothing in this layer retries.

use std::fmt;
use std::time::Duration;

use matrx_bus::BusError;
use matrx_types::{CorrelationId, DeviceId, ValidationError};
use thiserror::Error;

use crate::domain::WaiterState;

/// Errors returned by the provisioner, publisher, waiter and client facade.
#[derive(Debug, Error)]
pub enum RenderClientError {
    /// The broker rejected an exchange/queue declare or a bind.
    #[error("failed to provision queue '{queue}': {source}")]
    Provisioning {
        queue: String,
        device_id: Option<String>,
        correlation_id: Option<CorrelationId>,
        #[source]
        source: BusError,
    },

    /// The request was not accepted (confirm nack, closed channel, transport).
    #[error("publish of request {correlation_id} for device '{device_id}' failed: {reason}")]
    Publish {
        device_id: String,
        correlation_id: CorrelationId,
        reason: String,
    },

    /// No queue is bound to the request routing key.
    #[error("request {correlation_id} for device '{device_id}' was returned unroutable: {reply_text}")]
    Unroutable {
        device_id: String,
        correlation_id: CorrelationId,
        reply_text: String,
    },

    /// No acceptable reply arrived in time. Re-publishing may succeed.
    #[error("no reply for device '{device_id}' within {timeout:?}")]
    Timeout {
        device_id: String,
        correlation_id: Option<CorrelationId>,
        timeout: Duration,
    },

    /// Channel or connection lost.
    #[error("transport failure for device '{device_id}': {source}")]
    Transport {
        device_id: String,
        correlation_id: Option<CorrelationId>,
        #[source]
        source: BusError,
    },

    /// The request failed validation before anything was sent.
    #[error("invalid render request for device '{device_id}': {source}")]
    InvalidRequest {
        device_id: String,
        correlation_id: Option<CorrelationId>,
        #[source]
        source: ValidationError,
    },

    /// The waiter is in a state that does not allow the operation.
    #[error("waiter for device '{device_id}' is {state}")]
    InvalidState {
        device_id: String,
        state: WaiterState,
    },
}

impl RenderClientError {
    /// Device the failure concerns, when known.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Provisioning { device_id, .. } => device_id.as_deref(),
            Self::Publish { device_id, .. }
            | Self::Unroutable { device_id, .. }
            | Self::Timeout { device_id, .. }
            | Self::Transport { device_id, .. }
            | Self::InvalidRequest { device_id, .. }
            | Self::InvalidState { device_id, .. } => Some(device_id),
        }
    }

    /// Correlation id of the request, when one was assigned.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::Publish { correlation_id, .. } | Self::Unroutable { correlation_id, .. } => {
                Some(correlation_id)
            }
            Self::Provisioning { correlation_id, .. }
            | Self::InvalidRequest { correlation_id, .. }
            | Self::Timeout { correlation_id, .. }
            | Self::Transport { correlation_id, .. } => correlation_id.as_ref(),
            Self::InvalidState { .. } => None,
        }
    }

    pub(crate) fn invalid_request(
        device_id: &DeviceId,
        correlation_id: Option<&CorrelationId>,
        source: ValidationError,
    ) -> Self {
        Self::InvalidRequest {
            device_id: device_id.to_string(),
            correlation_id: correlation_id.cloned(),
            source,
        }
    }

    /// Fill in the device and correlation id of the request this failure
    /// belongs to, where the failing step did not know them.
    #[must_use]
    pub(crate) fn in_request(mut self, device: &DeviceId, id: &CorrelationId) -> Self {
        if let Self::Provisioning { device_id, .. } = &mut self {
            device_id.get_or_insert_with(|| device.to_string());
        }
        match &mut self {
            Self::Provisioning { correlation_id, .. }
            | Self::InvalidRequest { correlation_id, .. }
            | Self::Timeout { correlation_id, .. }
            | Self::Transport { correlation_id, .. } => {
                correlation_id.get_or_insert_with(|| id.clone());
            }
            Self::Publish { .. } | Self::Unroutable { .. } | Self::InvalidState { .. } => {}
        }
        self
    }

    /// Whether issuing the same request again could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }
}

/// Why a waiter skipped a message on the reply queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyRejection {
    /// Body is not JSON or lacks `render_output`.
    Malformed(String),
    /// Reply belongs to another request.
    CorrelationMismatch {
        expected: CorrelationId,
        actual: CorrelationId,
    },
    /// Reply carries no correlation id and matching is strict.
    MissingCorrelation { expected: CorrelationId },
}

impl ReplyRejection {
    /// Metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::CorrelationMismatch { .. } => "correlation_mismatch",
            Self::MissingCorrelation { .. } => "missing_correlation",
        }
    }

    /// Whether the message may belong to another in-flight request.
    pub fn is_stale(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }
}

impl fmt::Display for ReplyRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(detail) => write!(f, "malformed reply: {detail}"),
            Self::CorrelationMismatch { expected, actual } => {
                write!(f, "reply for {actual}, expected {expected}")
            }
            Self::MissingCorrelation { expected } => {
                write!(f, "reply without correlation id, expected {expected}")
            }
        }
    }
}
