//! Shared setup for the integration flows.

use std::sync::Arc;

use async_trait::async_trait;
use matrx_bus::{
    BrokerChannel, DeliveryMode, InMemoryBroker, MessageProperties, OutboundMessage,
    PublishOutcome,
};
use matrx_render_client::{ClientConfig, RenderClient, ReplyQueue, ReplyQueueProvisioner};
use matrx_render_worker::{
    ConsumerStats, RenderHandler, RequestConsumer, WorkerConfig, WorkerError,
};
use matrx_types::{Device, DeviceId, RenderRequest, Topology};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The clock request every scenario starts from.
pub fn clock_request(device: &str) -> RenderRequest {
    let device = Device::new(DeviceId::new(device).unwrap(), 64, 32).unwrap();
    RenderRequest::new("clock", device).with_param("timezone", "UTC")
}

pub fn client(broker: &InMemoryBroker) -> RenderClient {
    RenderClient::new(Arc::new(broker.clone()), ClientConfig::default())
}

pub fn client_with(broker: &InMemoryBroker, config: ClientConfig) -> RenderClient {
    RenderClient::new(Arc::new(broker.clone()), config)
}

/// Provision the reply queue of `device` and the request queue.
pub async fn provision(broker: &InMemoryBroker, device: &str) -> ReplyQueue {
    let provisioner = ReplyQueueProvisioner::new(Arc::new(broker.channel()), Topology::default());
    provisioner.ensure_request_queue().await.unwrap();
    provisioner
        .provision(&DeviceId::new(device).unwrap())
        .await
        .unwrap()
}

/// Publish a reply the way a renderer would: to the exchange, keyed by the
/// device id.
pub async fn publish_reply(
    broker: &InMemoryBroker,
    device: &str,
    correlation_id: Option<&str>,
    body: &str,
    delivery_mode: DeliveryMode,
) {
    let channel = broker.channel();
    let mut properties = MessageProperties {
        delivery_mode,
        ..MessageProperties::default()
    };
    if let Some(id) = correlation_id {
        properties = properties.with_correlation_id(id);
    }
    let outcome = channel
        .publish(OutboundMessage::new(
            "matrx",
            device,
            properties,
            body.as_bytes().to_vec(),
        ))
        .await
        .unwrap();
    assert_eq!(outcome, PublishOutcome::Confirmed);
}

/// A running request consumer.
pub struct Worker {
    pub shutdown: watch::Sender<bool>,
    pub task: JoinHandle<Result<ConsumerStats, WorkerError>>,
}

impl Worker {
    pub async fn stop(self) -> ConsumerStats {
        self.shutdown.send(true).unwrap();
        self.task.await.unwrap().unwrap()
    }
}

pub fn spawn_worker<H: RenderHandler + 'static>(broker: &InMemoryBroker, handler: H) -> Worker {
    let channel: Arc<dyn BrokerChannel> = Arc::new(broker.channel());
    let config = WorkerConfig {
        consumer_tag: "matrx-renderer-test".to_string(),
        ..WorkerConfig::default()
    };
    let consumer = RequestConsumer::new(channel, handler, config);
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(async move { consumer.run(rx).await });
    Worker { shutdown, task }
}

/// Renders the request's app id as the image bytes, so every reply is
/// traceable to its request.
pub struct AppIdRenderer;

#[async_trait]
impl RenderHandler for AppIdRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, WorkerError> {
        Ok(request.app_id.as_bytes().to_vec())
    }
}

/// Fails every render.
pub struct BrokenRenderer;

#[async_trait]
impl RenderHandler for BrokenRenderer {
    async fn render(&self, _request: &RenderRequest) -> Result<Vec<u8>, WorkerError> {
        Err(WorkerError::Handler("font missing".to_string()))
    }
}
