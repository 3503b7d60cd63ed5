//! # Error Types
//!
//! Validation errors for render envelopes and identifiers.

use thiserror::Error;

/// Errors raised while validating or decoding protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Device id is empty.
    #[error("device.id is required")]
    EmptyDeviceId,

    /// Device id would overflow the 255-byte queue name limit.
    #[error("device id is {len} bytes, maximum is {max}")]
    DeviceIdTooLong { len: usize, max: usize },

    /// Device id contains a topic wildcard and cannot be bound literally.
    #[error("device id {id:?} contains a topic wildcard ('*' or '#')")]
    DeviceIdWildcard { id: String },

    /// Reply queue name of the device exceeds the broker's name limit.
    #[error("reply queue name is {} bytes, maximum is {max}", queue.len())]
    QueueNameTooLong { queue: String, max: usize },

    /// Device id collides with a reserved routing key.
    #[error("device id {id:?} collides with the reserved routing key {reserved:?}")]
    ReservedDeviceId { id: String, reserved: String },

    /// App id is empty.
    #[error("app_id is required")]
    EmptyAppId,

    /// Device dimensions must both be positive.
    #[error("device dimensions must be positive, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },

    /// Message body could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::Decode(err.to_string())
    }
}
