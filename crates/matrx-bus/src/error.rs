//! Errors from broker operations.

use thiserror::Error;

/// Errors surfaced by a [`crate::Broker`] or [`crate::BrokerChannel`].
///
/// Channel-level failures (`PreconditionFailed`, `NotFound`,
/// `UnknownDeliveryTag`) close the channel they happened on, as AMQP does.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The channel was closed (explicitly, by an error, or by a restart).
    #[error("channel closed")]
    ChannelClosed,

    /// The connection to the broker is gone.
    #[error("connection error: {0}")]
    Connection(String),

    /// A declare conflicted with an existing entity's parameters.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A referenced exchange or queue does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Ack or nack of a delivery the channel does not hold.
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),

    /// Any other broker or protocol failure.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BusError {
    /// Whether the failure leaves the channel unusable.
    #[must_use]
    pub fn closes_channel(&self) -> bool {
        !matches!(self, BusError::Protocol(_))
    }
}
