//! # MATRX Bus - Broker Abstraction for the Render Protocol
//!
//! The render protocol assumes a broker with AMQP 0-9-1 semantics. This crate
//! names exactly the slice of those semantics the protocol depends on, behind
//! two ports:
//!
//! - [`Broker`]: opens channels.
//! - [`BrokerChannel`]: declares, binds, publishes with confirms, consumes.
//!
//! ## Implementations
//!
//! - [`InMemoryBroker`]: in-process broker with topic routing, durable
//!   queues, manual acknowledgement, prefetch, mandatory returns and a
//!   simulated restart. Used by tests and local harness runs.
//! - `AmqpBroker` (feature `amqp`): RabbitMQ via `lapin`.
//!
//! ```text
//! ┌──────────┐ publish(mandatory) ┌───────────────┐  route   ┌─────────────┐
//! │ channel  │ ─────────────────→ │ topic exchange│ ───────→ │ queue(s)    │
//! └──────────┘ ←── confirm/return └───────────────┘          └──────┬──────┘
//!                                                   deliver (prefetch)│
//!                                          ┌───────────────┐          │
//!                                          │ consumer      │ ←────────┘
//!                                          │ ack / nack    │
//!                                          └───────────────┘
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod channel;
pub mod error;
pub mod memory;
pub mod message;
pub mod topic;

// Re-export main types
#[cfg(feature = "amqp")]
pub use amqp::{AmqpBroker, AmqpChannel};
pub use channel::{Broker, BrokerChannel, DeliveryStream};
pub use error::BusError;
pub use memory::{InMemoryBroker, InMemoryChannel, QueuedMessage};
pub use message::{
    Acknowledger, Binding, Delivery, DeliveryMode, ExchangeKind, ExchangeSpec, MessageProperties,
    OutboundMessage, PublishOutcome, QueueInfo, QueueSpec,
};
pub use topic::topic_matches;

/// Reply code sent when a channel is closed normally.
pub const REPLY_SUCCESS: u16 = 200;

/// Longest queue, exchange or routing key name (AMQP short string).
pub const MAX_NAME_LEN: usize = 255;
