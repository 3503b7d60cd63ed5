//! # Render Client
//!
//! One request, one round trip:
//!
//! ```text
//! provision reply queue ──→ subscribe waiter ──→ publish request ──→ wait
//!   (control channel)        (waiter channel)    (control channel)
//! ```
//!
//! The waiter subscribes before the request is published, so a fast
//! renderer cannot answer into a queue nobody reads yet. Each call opens its
//! own two channels and closes both on every exit path.

use std::sync::Arc;
use std::time::Duration;

use matrx_bus::{Broker, BrokerChannel};
use matrx_types::{CorrelationId, RenderRequest};
use tracing::{debug, info_span, Instrument};

use crate::config::ClientConfig;
use crate::domain::{CancelSignal, WaitOutcome};
use crate::error::RenderClientError;
use crate::provisioner::ReplyQueueProvisioner;
use crate::publisher::{PublishReceipt, RequestPublisher};
use crate::waiter::ReplyWaiter;

/// Result of a completed round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundTrip {
    pub receipt: PublishReceipt,
    pub outcome: WaitOutcome,
}

pub struct RenderClient {
    broker: Arc<dyn Broker>,
    config: ClientConfig,
}

impl RenderClient {
    pub fn new(broker: Arc<dyn Broker>, config: ClientConfig) -> Self {
        Self { broker, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send `request` and wait for its reply. `timeout` defaults to the
    /// configured reply timeout.
    pub async fn render(
        &self,
        request: RenderRequest,
        timeout: Option<Duration>,
        mut cancel: CancelSignal,
    ) -> Result<RoundTrip, RenderClientError> {
        let request = if request.correlation_id.is_some() {
            request
        } else {
            request.with_correlation_id(CorrelationId::new())
        };
        let correlation_id = request.correlation_id.clone().unwrap_or_default();
        request
            .validate()
            .and_then(|()| self.config.topology.check_device(&request.device.id))
            .map_err(|source| {
                RenderClientError::invalid_request(&request.device.id, Some(&correlation_id), source)
            })?;
        let timeout = timeout.unwrap_or(self.config.reply_timeout);

        let span = info_span!(
            "render",
            device_id = %request.device.id,
            correlation_id = %correlation_id,
            app_id = %request.app_id
        );

        async move {
            let control = self.open_channel(&request, &correlation_id).await?;
            let result = self
                .round_trip(control.clone(), &request, &correlation_id, timeout, &mut cancel)
                .await
                .map_err(|e| e.in_request(&request.device.id, &correlation_id));
            if let Err(e) = control.close().await {
                debug!(error = %e, "Control channel close failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn round_trip(
        &self,
        control: Arc<dyn BrokerChannel>,
        request: &RenderRequest,
        correlation_id: &CorrelationId,
        timeout: Duration,
        cancel: &mut CancelSignal,
    ) -> Result<RoundTrip, RenderClientError> {
        let topology = &self.config.topology;
        let provisioner = ReplyQueueProvisioner::new(control.clone(), topology.clone());
        if self.config.ensure_request_queue {
            provisioner.ensure_request_queue().await?;
        }
        provisioner.provision(&request.device.id).await?;

        let waiter_channel = self.open_channel(request, correlation_id).await?;
        let mut waiter = ReplyWaiter::new(waiter_channel, topology, request.device.id.clone())
            .with_matching(self.config.matching)
            .with_stale_policy(self.config.stale_policy)
            .with_stale_backoff(self.config.stale_backoff);
        waiter.subscribe().await?;

        let publisher = RequestPublisher::new(control, topology.clone());
        let receipt = match publisher.publish(request).await {
            Ok(receipt) => receipt,
            Err(e) => {
                waiter.abort().await;
                return Err(e);
            }
        };

        let outcome = waiter.wait(Some(correlation_id), timeout, cancel).await?;
        Ok(RoundTrip { receipt, outcome })
    }

    async fn open_channel(
        &self,
        request: &RenderRequest,
        correlation_id: &CorrelationId,
    ) -> Result<Arc<dyn BrokerChannel>, RenderClientError> {
        self.broker
            .open_channel()
            .await
            .map_err(|source| RenderClientError::Transport {
                device_id: request.device.id.to_string(),
                correlation_id: Some(correlation_id.clone()),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cancellation;
    use matrx_bus::{InMemoryBroker, MessageProperties, OutboundMessage, QueueSpec};
    use matrx_types::{Device, DeviceId, Topology, ValidationError};
    use tokio_stream::StreamExt;

    fn request(device: &str) -> RenderRequest {
        let device = Device::new(DeviceId::new(device).unwrap(), 64, 32).unwrap();
        RenderRequest::new("clock", device).with_param("timezone", "UTC")
    }

    /// Answers every request on the request queue with `output`, echoing the
    /// correlation id as a message property.
    async fn spawn_echo_renderer(broker: InMemoryBroker, output: &'static str) {
        let channel: Arc<dyn BrokerChannel> = Arc::new(broker.channel());
        ReplyQueueProvisioner::new(channel.clone(), Topology::default())
            .ensure_request_queue()
            .await
            .unwrap();
        let mut stream = channel
            .consume("matrx.renderer_requests", "echo")
            .await
            .unwrap();

        tokio::spawn(async move {
            while let Some(Ok(delivery)) = stream.next().await {
                let request = RenderRequest::from_json_slice(&delivery.body).unwrap();
                let mut properties = MessageProperties::default().persistent();
                if let Some(id) = delivery.correlation_id() {
                    properties = properties.with_correlation_id(id);
                }
                let body = format!(r#"{{"render_output":"{output}"}}"#).into_bytes();
                channel
                    .publish(OutboundMessage::new(
                        "matrx",
                        request.device.id.as_str(),
                        properties,
                        body,
                    ))
                    .await
                    .unwrap();
                delivery.ack().await.unwrap();
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_round_trip() {
        let broker = InMemoryBroker::new();
        spawn_echo_renderer(broker.clone(), "QUJD").await;
        let client = RenderClient::new(Arc::new(broker.clone()), ClientConfig::default());

        let round_trip = client
            .render(request("dev-1"), Some(Duration::from_secs(5)), CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(round_trip.outcome.reply().unwrap().render_output, "QUJD");
        assert_eq!(round_trip.receipt.reply_to, "matrx.dev-1");
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_keeps_caller_correlation_id() {
        let broker = InMemoryBroker::new();
        spawn_echo_renderer(broker.clone(), "QUJD").await;
        let client = RenderClient::new(Arc::new(broker.clone()), ClientConfig::default());
        let id = CorrelationId::from_wire("caller-chosen");

        let round_trip = client
            .render(
                request("dev-1").with_correlation_id(id.clone()),
                None,
                CancelSignal::never(),
            )
            .await
            .unwrap();
        assert_eq!(round_trip.receipt.correlation_id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_times_out_without_renderer() {
        let broker = InMemoryBroker::new();
        let client = RenderClient::new(Arc::new(broker.clone()), ClientConfig::default());

        let err = client
            .render(request("dev-1"), Some(Duration::from_secs(5)), CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, RenderClientError::Timeout { .. }));
        assert!(err.correlation_id().is_some());
        assert_eq!(broker.open_channel_count(), 0);
        // The request stays queued for a renderer that comes up later.
        assert_eq!(
            broker
                .queue_info("matrx.renderer_requests")
                .unwrap()
                .message_count,
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_unroutable_without_request_queue() {
        let broker = InMemoryBroker::new();
        let config = ClientConfig {
            ensure_request_queue: false,
            ..ClientConfig::default()
        };
        let client = RenderClient::new(Arc::new(broker.clone()), config);

        let err = client
            .render(request("dev-1"), None, CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, RenderClientError::Unroutable { .. }));
        assert_eq!(broker.open_channel_count(), 0);
        assert_eq!(broker.queue_info("matrx.dev-1").unwrap().consumer_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_cancelled() {
        let broker = InMemoryBroker::new();
        let client = RenderClient::new(Arc::new(broker.clone()), ClientConfig::default());
        let (handle, signal) = cancellation();
        handle.cancel();

        let round_trip = client
            .render(request("dev-1"), None, signal)
            .await
            .unwrap();
        assert_eq!(round_trip.outcome, WaitOutcome::Cancelled);
        assert_eq!(broker.open_channel_count(), 0);
    }

    #[tokio::test]
    async fn test_render_rejects_invalid_request() {
        let broker = InMemoryBroker::new();
        let client = RenderClient::new(Arc::new(broker.clone()), ClientConfig::default());
        let mut bad = request("dev-1");
        bad.device.width = 0;

        let err = client
            .render(bad, None, CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, RenderClientError::InvalidRequest { .. }));
        assert!(!broker.has_exchange("matrx"));
    }

    fn assert_request_ids(err: &RenderClientError, device: &str, id: &CorrelationId) {
        assert_eq!(err.device_id(), Some(device), "{err}");
        assert_eq!(err.correlation_id(), Some(id), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_errors_name_device_and_request() {
        let broker = InMemoryBroker::new();
        let setup = broker.channel();
        setup
            .declare_queue(&QueueSpec::transient("matrx.dev-1"))
            .await
            .unwrap();
        let client = RenderClient::new(Arc::new(broker.clone()), ClientConfig::default());

        let id = CorrelationId::from_wire("c-provision");
        let err = client
            .render(
                request("dev-1").with_correlation_id(id.clone()),
                None,
                CancelSignal::never(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RenderClientError::Provisioning { .. }));
        assert_request_ids(&err, "dev-1", &id);

        let id = CorrelationId::from_wire("c-invalid");
        let mut bad = request("dev-2").with_correlation_id(id.clone());
        bad.device.width = 0;
        let err = client
            .render(bad, None, CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, RenderClientError::InvalidRequest { .. }));
        assert_request_ids(&err, "dev-2", &id);

        let id = CorrelationId::from_wire("c-timeout");
        let err = client
            .render(
                request("dev-3").with_correlation_id(id.clone()),
                Some(Duration::from_secs(1)),
                CancelSignal::never(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RenderClientError::Timeout { .. }));
        assert_request_ids(&err, "dev-3", &id);

        let no_queue = RenderClient::new(
            Arc::new(InMemoryBroker::new()),
            ClientConfig {
                ensure_request_queue: false,
                ..ClientConfig::default()
            },
        );
        let id = CorrelationId::from_wire("c-unroutable");
        let err = no_queue
            .render(
                request("dev-4").with_correlation_id(id.clone()),
                None,
                CancelSignal::never(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RenderClientError::Unroutable { .. }));
        assert_request_ids(&err, "dev-4", &id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_generated_id_reported_on_rejection() {
        let broker = InMemoryBroker::new();
        let client = RenderClient::new(Arc::new(broker.clone()), ClientConfig::default());
        let mut bad = request("dev-1");
        bad.app_id = String::new();

        let err = client
            .render(bad, None, CancelSignal::never())
            .await
            .unwrap_err();
        assert_eq!(err.device_id(), Some("dev-1"));
        assert!(err.correlation_id().is_some());
    }

    #[tokio::test]
    async fn test_render_rejects_device_too_long_for_exchange() {
        let broker = InMemoryBroker::new();
        let config = ClientConfig {
            topology: Topology::new("matrx-staging", "renderer_requests"),
            ..ClientConfig::default()
        };
        let client = RenderClient::new(Arc::new(broker.clone()), config);
        let device = "d".repeat(DeviceId::MAX_LEN);

        let err = client
            .render(request(&device), None, CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RenderClientError::InvalidRequest {
                source: ValidationError::QueueNameTooLong { .. },
                ..
            }
        ));
        assert_eq!(err.device_id(), Some(device.as_str()));
        assert!(!broker.has_exchange("matrx-staging"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_with_unbounded_timeout_cancels() {
        let broker = InMemoryBroker::new();
        let client = RenderClient::new(Arc::new(broker.clone()), ClientConfig::default());
        let (handle, signal) = cancellation();
        handle.cancel();

        let round_trip = client
            .render(request("dev-1"), Some(Duration::MAX), signal)
            .await
            .unwrap();
        assert_eq!(round_trip.outcome, WaitOutcome::Cancelled);
        assert_eq!(broker.open_channel_count(), 0);
    }
}
