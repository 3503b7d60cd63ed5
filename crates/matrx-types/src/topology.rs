//! # Broker Topology
//!
//! Names of the exchange, request queue and per-device reply queues.
//!
//! ```text
//!                       ┌──────────────────────────┐
//!  "renderer_requests"  │ matrx.renderer_requests  │ ──→ renderer
//!  ┌─────────────┐ ───→ └──────────────────────────┘
//!  │ matrx       │
//!  │ (topic)     │ ───→ ┌──────────────────────────┐
//!  └─────────────┘      │ matrx.<device id>        │ ──→ client
//!      "<device id>"    └──────────────────────────┘
//! ```

use crate::entities::DeviceId;
use crate::errors::ValidationError;

/// Default exchange name, also the prefix of every queue name.
pub const DEFAULT_EXCHANGE: &str = "matrx";

/// Routing key of render requests.
pub const REQUEST_ROUTING_KEY: &str = "renderer_requests";

/// Longest queue name the broker accepts (AMQP short string).
pub const MAX_QUEUE_NAME_LEN: usize = 255;

/// Resolved topology names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Durable topic exchange carrying requests and replies.
    pub exchange: String,
    /// Prefix of every queue name (`<prefix>.<suffix>`).
    pub queue_prefix: String,
    /// Queue the renderers consume requests from.
    pub request_queue: String,
    /// Routing key requests are published with.
    pub request_routing_key: String,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new(DEFAULT_EXCHANGE, REQUEST_ROUTING_KEY)
    }
}

impl Topology {
    /// Topology whose queue prefix equals the exchange name.
    pub fn new(exchange: impl Into<String>, request_routing_key: impl Into<String>) -> Self {
        let exchange = exchange.into();
        let request_routing_key = request_routing_key.into();
        Self {
            request_queue: format!("{}.{}", exchange, request_routing_key),
            queue_prefix: exchange.clone(),
            exchange,
            request_routing_key,
        }
    }

    #[must_use]
    pub fn with_request_queue(mut self, request_queue: impl Into<String>) -> Self {
        self.request_queue = request_queue.into();
        self
    }

    /// Reply queue of `device`: `<prefix>.<device id>`.
    pub fn reply_queue_name(&self, device: &DeviceId) -> String {
        format!("{}.{}", self.queue_prefix, device)
    }

    /// Reply routing key of `device`: the raw device id.
    pub fn reply_routing_key<'a>(&self, device: &'a DeviceId) -> &'a str {
        device.as_str()
    }

    /// Reject device ids whose reply binding would capture requests or whose
    /// reply queue name is too long for the broker.
    pub fn check_device(&self, device: &DeviceId) -> Result<(), ValidationError> {
        let queue = self.reply_queue_name(device);
        if device.as_str() == self.request_routing_key || queue == self.request_queue {
            return Err(ValidationError::ReservedDeviceId {
                id: device.to_string(),
                reserved: self.request_routing_key.clone(),
            });
        }
        if queue.len() > MAX_QUEUE_NAME_LEN {
            return Err(ValidationError::QueueNameTooLong {
                queue,
                max: MAX_QUEUE_NAME_LEN,
            });
        }
        Ok(())
    }
}
