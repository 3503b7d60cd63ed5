//! # Request Publisher
//!
//! Publishes a validated render request to the request routing key as a
//! persistent, mandatory JSON message with publisher confirms. The
//! correlation id travels as a message property and in the body; `reply_to`
//! names the device's reply queue.

use std::sync::Arc;

use matrx_bus::{BrokerChannel, MessageProperties, OutboundMessage, PublishOutcome};
use matrx_telemetry::{PUBLISH_FAILURES, REQUESTS_PUBLISHED};
use matrx_types::{CorrelationId, RenderRequest, Topology, CONTENT_TYPE_JSON};
use tracing::{info, warn};

use crate::error::RenderClientError;

/// Proof that the broker accepted a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub correlation_id: CorrelationId,
    pub device_id: String,
    pub routing_key: String,
    pub reply_to: String,
    pub body_len: usize,
}

pub struct RequestPublisher {
    channel: Arc<dyn BrokerChannel>,
    topology: Topology,
}

impl RequestPublisher {
    pub fn new(channel: Arc<dyn BrokerChannel>, topology: Topology) -> Self {
        Self { channel, topology }
    }

    /// Publish `request`. A request without a correlation id gets a fresh one,
    /// reported in the receipt.
    pub async fn publish(&self, request: &RenderRequest) -> Result<PublishReceipt, RenderClientError> {
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(CorrelationId::new);
        let invalid = |source| {
            PUBLISH_FAILURES.with_label_values(&["invalid"]).inc();
            RenderClientError::invalid_request(&request.device.id, Some(&correlation_id), source)
        };
        request
            .validate()
            .and_then(|()| self.topology.check_device(&request.device.id))
            .map_err(invalid)?;

        let device_id = request.device.id.to_string();
        let reply_to = self.topology.reply_queue_name(&request.device.id);

        let body = if request.correlation_id.is_some() {
            request.to_json_bytes()
        } else {
            request
                .clone()
                .with_correlation_id(correlation_id.clone())
                .to_json_bytes()
        }
        .map_err(invalid)?;
        let body_len = body.len();

        let properties = MessageProperties::default()
            .with_content_type(CONTENT_TYPE_JSON)
            .persistent()
            .with_correlation_id(correlation_id.as_str())
            .with_reply_to(reply_to.clone());
        let message = OutboundMessage::new(
            self.topology.exchange.clone(),
            self.topology.request_routing_key.clone(),
            properties,
            body,
        );

        let failed = |reason: String| RenderClientError::Publish {
            device_id: device_id.clone(),
            correlation_id: correlation_id.clone(),
            reason,
        };

        match self.channel.publish(message).await {
            Ok(PublishOutcome::Confirmed) => {
                REQUESTS_PUBLISHED.inc();
                info!(
                    device_id = %device_id,
                    correlation_id = %correlation_id,
                    app_id = %request.app_id,
                    routing_key = %self.topology.request_routing_key,
                    "Render request published"
                );
                Ok(PublishReceipt {
                    correlation_id,
                    device_id,
                    routing_key: self.topology.request_routing_key.clone(),
                    reply_to,
                    body_len,
                })
            }
            Ok(PublishOutcome::Returned { reply_text }) => {
                PUBLISH_FAILURES.with_label_values(&["unroutable"]).inc();
                warn!(
                    device_id = %device_id,
                    correlation_id = %correlation_id,
                    routing_key = %self.topology.request_routing_key,
                    reply_text = %reply_text,
                    "Render request returned unroutable"
                );
                Err(RenderClientError::Unroutable {
                    device_id,
                    correlation_id,
                    reply_text,
                })
            }
            Ok(PublishOutcome::Nacked) => {
                PUBLISH_FAILURES.with_label_values(&["nacked"]).inc();
                warn!(device_id = %device_id, correlation_id = %correlation_id, "Render request nacked");
                Err(failed("broker nacked the message".to_string()))
            }
            Err(e) => {
                PUBLISH_FAILURES.with_label_values(&["transport"]).inc();
                warn!(device_id = %device_id, correlation_id = %correlation_id, error = %e, "Render request publish failed");
                Err(failed(e.to_string()))
            }
        }
    }
}
