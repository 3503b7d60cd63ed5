//! # Broker Ports
//!
//! The interface the protocol uses to talk to a broker. One [`Broker`] per
//! connection; any number of [`BrokerChannel`]s per broker. Channels are
//! independent: acknowledgements and prefetch windows are per channel, so
//! concurrent requests should not share one.

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;

use crate::error::BusError;
use crate::message::{
    Binding, Delivery, ExchangeSpec, OutboundMessage, PublishOutcome, QueueInfo, QueueSpec,
};

/// Deliveries of one consumer. Ends when the consumer is cancelled or its
/// channel closes.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BusError>> + Send>>;

/// A broker connection.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a new channel with publisher confirms enabled.
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, BusError>;
}

/// A channel on a broker connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn is_open(&self) -> bool;

    /// Idempotent exchange declare.
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BusError>;

    /// Idempotent queue declare.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<QueueInfo, BusError>;

    /// Idempotent binding; binding twice yields one binding.
    async fn bind_queue(&self, binding: &Binding) -> Result<(), BusError>;

    /// Limit unacknowledged deliveries per channel (0 = unlimited).
    async fn set_prefetch(&self, count: u16) -> Result<(), BusError>;

    /// Publish and wait for the publisher confirm.
    async fn publish(&self, message: OutboundMessage) -> Result<PublishOutcome, BusError>;

    /// Start a manual-ack consumer.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BusError>;

    /// Stop a consumer. Its unacknowledged deliveries stay with the channel.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), BusError>;

    /// Close the channel; the broker requeues everything left unacknowledged.
    async fn close(&self) -> Result<(), BusError>;
}
