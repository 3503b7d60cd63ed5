//! Error types for the render worker

use matrx_bus::BusError;
use matrx_types::ValidationError;
use thiserror::Error;

/// Errors that can occur while serving render requests
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Undecodable request body: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    Validation(ValidationError),

    #[error("Render failed: {0}")]
    Handler(String),

    #[error("Reply to device {device_id} not published: {reason}")]
    Publish { device_id: String, reason: String },

    #[error("Broker error: {0}")]
    Bus(#[from] BusError),
}

impl From<ValidationError> for WorkerError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Decode(msg) => WorkerError::Decode(msg),
            other => WorkerError::Validation(other),
        }
    }
}

impl WorkerError {
    /// Label used for rejection metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            WorkerError::Decode(_) => "decode",
            WorkerError::Validation(_) => "validation",
            WorkerError::Handler(_) => "handler",
            WorkerError::Publish { .. } => "publish",
            WorkerError::Bus(_) => "bus",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_errors_split_from_validation() {
        let decode: WorkerError = ValidationError::Decode("eof".into()).into();
        assert!(matches!(decode, WorkerError::Decode(_)));
        assert_eq!(decode.reason(), "decode");

        let invalid: WorkerError = ValidationError::EmptyAppId.into();
        assert!(matches!(invalid, WorkerError::Validation(_)));
        assert_eq!(invalid.reason(), "validation");
    }
}
