//! # Broker Messages and Entity Specs
//!
//! Declarations (exchange, queue, binding), outbound messages with their
//! properties, and inbound deliveries carrying an acknowledgement handle.

use async_trait::async_trait;
use std::fmt;

use crate::error::BusError;

// =============================================================================
// TOPOLOGY DECLARATIONS
// =============================================================================

/// Routing behaviour of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Routing key equals binding key.
    Direct,
    /// Every bound queue receives every message.
    Fanout,
    /// Dot-separated words with `*` / `#` wildcards in binding keys.
    Topic,
}

/// Parameters of an exchange declare. Re-declaring with equal parameters is
/// a no-op; any difference is a precondition failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
}

impl ExchangeSpec {
    /// Durable topic exchange.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Topic,
            durable: true,
            auto_delete: false,
        }
    }
}

/// Parameters of a queue declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueSpec {
    /// Durable, shared, never auto-deleted queue.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// Non-durable queue deleted when its last consumer goes away.
    pub fn transient(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            exclusive: false,
            auto_delete: true,
        }
    }

    /// Whether a re-declare with `other` would be accepted.
    pub fn is_equivalent(&self, other: &QueueSpec) -> bool {
        self.durable == other.durable
            && self.exclusive == other.exclusive
            && self.auto_delete == other.auto_delete
    }
}

/// Broker answer to a queue declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    /// Messages ready for delivery (not counting unacknowledged ones).
    pub message_count: u32,
    pub consumer_count: u32,
}

/// A queue bound to an exchange under a binding key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl Binding {
    pub fn new(
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// AMQP delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Lost on broker restart.
    #[default]
    Transient,
    /// Written to disk while queued; survives broker restart.
    Persistent,
}

impl DeliveryMode {
    pub fn as_u8(self) -> u8 {
        match self {
            DeliveryMode::Transient => 1,
            DeliveryMode::Persistent => 2,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        if value == 2 {
            DeliveryMode::Persistent
        } else {
            DeliveryMode::Transient
        }
    }
}

/// Message properties the protocol reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub delivery_mode: DeliveryMode,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl MessageProperties {
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.delivery_mode = DeliveryMode::Persistent;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    /// Ask the broker to return the message when no queue is bound.
    pub mandatory: bool,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    /// Mandatory message; unroutable publishes come back as
    /// [`PublishOutcome::Returned`].
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            mandatory: true,
            properties,
            body,
        }
    }
}

/// Publisher-confirm result of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Accepted and routed to at least one queue (or not mandatory).
    Confirmed,
    /// Mandatory message matched no queue and was handed back.
    Returned { reply_text: String },
    /// The broker refused responsibility for the message.
    Nacked,
}

// =============================================================================
// DELIVERIES
// =============================================================================

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Remove the message from the queue.
    async fn ack(&self) -> Result<(), BusError>;

    /// Give the message back (`requeue`) or drop it / dead-letter it.
    async fn nack(&self, requeue: bool) -> Result<(), BusError>;
}

/// A message handed to a consumer. Stays unacknowledged until settled via
/// [`Delivery::ack`] or [`Delivery::nack`], or until its channel closes, at
/// which point the broker requeues it.
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    /// Set when the message was delivered before and requeued.
    pub redelivered: bool,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        delivery_tag: u64,
        exchange: String,
        routing_key: String,
        redelivered: bool,
        properties: MessageProperties,
        body: Vec<u8>,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            exchange,
            routing_key,
            redelivered,
            properties,
            body,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<(), BusError> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), BusError> {
        self.acker.nack(requeue).await
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.properties.correlation_id.as_deref()
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("properties", &self.properties)
            .field("body_len", &self.body.len())
            .finish()
    }
}
