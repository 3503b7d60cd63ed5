//! # Reply-Queue Provisioner
//!
//! Makes sure the durable reply queue of a device exists and is bound to the
//! exchange under the device id before a request for that device goes out.
//! Every step is an idempotent declare, so provisioning the same device
//! again is a no-op that yields the same single binding.

use std::sync::Arc;

use matrx_bus::{Binding, BrokerChannel, BusError, ExchangeSpec, QueueInfo, QueueSpec};
use matrx_telemetry::REPLY_QUEUES_PROVISIONED;
use matrx_types::{DeviceId, Topology};
use tracing::{debug, info};

use crate::error::RenderClientError;

/// A provisioned reply queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyQueue {
    pub name: String,
    pub routing_key: String,
    /// Replies already waiting when the queue was declared.
    pub message_count: u32,
    pub consumer_count: u32,
}

pub struct ReplyQueueProvisioner {
    channel: Arc<dyn BrokerChannel>,
    topology: Topology,
}

impl ReplyQueueProvisioner {
    pub fn new(channel: Arc<dyn BrokerChannel>, topology: Topology) -> Self {
        Self { channel, topology }
    }

    /// Declare the exchange, the device's durable reply queue and its binding.
    pub async fn provision(&self, device_id: &DeviceId) -> Result<ReplyQueue, RenderClientError> {
        self.topology
            .check_device(device_id)
            .map_err(|source| RenderClientError::invalid_request(device_id, None, source))?;
        let name = self.topology.reply_queue_name(device_id);
        let routing_key = self.topology.reply_routing_key(device_id).to_string();

        let failed = |source: BusError| RenderClientError::Provisioning {
            queue: name.clone(),
            device_id: Some(device_id.to_string()),
            correlation_id: None,
            source,
        };

        self.declare_exchange().await.map_err(failed)?;
        let info = self
            .channel
            .declare_queue(&QueueSpec::durable(name.clone()))
            .await
            .map_err(failed)?;
        self.channel
            .bind_queue(&Binding::new(
                name.clone(),
                self.topology.exchange.clone(),
                routing_key.clone(),
            ))
            .await
            .map_err(failed)?;

        REPLY_QUEUES_PROVISIONED.inc();
        info!(
            device_id = %device_id,
            queue = %name,
            routing_key = %routing_key,
            pending = info.message_count,
            "Reply queue ready"
        );

        Ok(ReplyQueue {
            name,
            routing_key,
            message_count: info.message_count,
            consumer_count: info.consumer_count,
        })
    }

    /// Declare the durable request queue and bind it with the request key.
    pub async fn ensure_request_queue(&self) -> Result<QueueInfo, RenderClientError> {
        let queue = self.topology.request_queue.clone();
        let failed = |source: BusError| RenderClientError::Provisioning {
            queue: queue.clone(),
            device_id: None,
            correlation_id: None,
            source,
        };

        self.declare_exchange().await.map_err(failed)?;
        let info = self
            .channel
            .declare_queue(&QueueSpec::durable(queue.clone()))
            .await
            .map_err(failed)?;
        self.channel
            .bind_queue(&Binding::new(
                queue.clone(),
                self.topology.exchange.clone(),
                self.topology.request_routing_key.clone(),
            ))
            .await
            .map_err(failed)?;

        debug!(
            queue = %queue,
            routing_key = %self.topology.request_routing_key,
            "Request queue ready"
        );
        Ok(info)
    }

    async fn declare_exchange(&self) -> Result<(), BusError> {
        self.channel
            .declare_exchange(&ExchangeSpec::topic(self.topology.exchange.clone()))
            .await
    }
}
