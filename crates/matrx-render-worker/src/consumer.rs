//! # Request Consumer
//!
//! Takes render requests off the request queue, hands them to a
//! [`RenderHandler`] and publishes the reply to the requesting device.
//!
//! ```text
//! matrx.renderer_requests ──→ decode ──→ handler ──→ reply ──→ exchange "matrx"
//!                               │           │          │        key = device id
//!                               ▼           ▼          ▼
//!                         nack (drop)  failure reply  nack (requeue)
//! ```
//!
//! Up to `prefetch_count` requests are rendered at once, each on its own
//! task. A request is acknowledged only after its reply was confirmed by the
//! broker.

use std::sync::Arc;

use matrx_bus::{
    Binding, BrokerChannel, BusError, Delivery, ExchangeSpec, MessageProperties, OutboundMessage,
    PublishOutcome, QueueInfo, QueueSpec,
};
use matrx_telemetry::{
    metric_inc, time_histogram, WORKER_RENDERS, WORKER_RENDER_DURATION,
    WORKER_REPLIES_PUBLISHED, WORKER_REQUESTS_RECEIVED, WORKER_REQUESTS_REJECTED,
};
use matrx_types::{CorrelationId, RenderReply, RenderRequest, CONTENT_TYPE_JSON};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::handler::RenderHandler;

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Reply published and request acknowledged. `failed` marks an error reply.
    Replied { failed: bool },
    /// Request dropped without requeue.
    Rejected,
    /// Reply could not be published; request handed back to the queue.
    Requeued,
}

/// Counters of one `run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub replied: u64,
    pub failed_renders: u64,
    pub rejected: u64,
    pub requeued: u64,
}

impl ConsumerStats {
    fn record(&mut self, disposition: Disposition) {
        self.received += 1;
        match disposition {
            Disposition::Replied { failed } => {
                self.replied += 1;
                if failed {
                    self.failed_renders += 1;
                }
            }
            Disposition::Rejected => self.rejected += 1,
            Disposition::Requeued => self.requeued += 1,
        }
    }

    fn settle(&mut self, settled: Result<Disposition, JoinError>) {
        match settled {
            Ok(disposition) => self.record(disposition),
            // The delivery stays unacked and is requeued when the channel closes.
            Err(e) => warn!(error = %e, "Render task did not finish"),
        }
    }

    async fn drain(&mut self, in_flight: &mut JoinSet<Disposition>) {
        while let Some(settled) = in_flight.join_next().await {
            self.settle(settled);
        }
    }
}

enum Event {
    /// Shutdown value changed; `false` when the sender is gone.
    Signal(bool),
    Settled(Result<Disposition, JoinError>),
    Delivery(Option<Result<Delivery, BusError>>),
}

pub struct RequestConsumer<H: RenderHandler> {
    channel: Arc<dyn BrokerChannel>,
    handler: Arc<H>,
    config: WorkerConfig,
}

impl<H: RenderHandler> Clone for RequestConsumer<H> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            handler: self.handler.clone(),
            config: self.config.clone(),
        }
    }
}

impl<H: RenderHandler> RequestConsumer<H> {
    pub fn new(channel: Arc<dyn BrokerChannel>, handler: H, config: WorkerConfig) -> Self {
        Self {
            channel,
            handler: Arc::new(handler),
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Declare the exchange and the durable request queue, bind them and set
    /// the channel prefetch.
    pub async fn setup(&self) -> Result<QueueInfo, WorkerError> {
        let topology = &self.config.topology;
        self.channel
            .declare_exchange(&ExchangeSpec::topic(topology.exchange.clone()))
            .await?;
        let info = self
            .channel
            .declare_queue(&QueueSpec::durable(topology.request_queue.clone()))
            .await?;
        self.channel
            .bind_queue(&Binding::new(
                topology.request_queue.clone(),
                topology.exchange.clone(),
                topology.request_routing_key.clone(),
            ))
            .await?;
        self.channel.set_prefetch(self.config.prefetch_count).await?;

        info!(
            queue = %topology.request_queue,
            routing_key = %topology.request_routing_key,
            prefetch = self.config.prefetch_count,
            pending = info.message_count,
            "Request queue ready"
        );
        Ok(info)
    }

    /// Requests rendered concurrently: the prefetch window, unbounded for a
    /// prefetch of zero.
    pub fn concurrency(&self) -> usize {
        match self.config.prefetch_count {
            0 => usize::MAX,
            n => usize::from(n),
        }
    }

    /// Serve requests until `shutdown` turns true (or its sender is dropped)
    /// or the delivery stream ends. Renders in progress are finished and
    /// settled before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<ConsumerStats, WorkerError>
    where
        H: 'static,
    {
        self.setup().await?;
        let queue = &self.config.topology.request_queue;
        let tag = &self.config.consumer_tag;
        let mut stream = self.channel.consume(queue, tag).await?;
        info!(queue = %queue, consumer_tag = %tag, "Render worker consuming");

        let mut stats = ConsumerStats::default();
        if *shutdown.borrow() {
            self.stop().await;
            return Ok(stats);
        }

        let concurrency = self.concurrency();
        let mut in_flight: JoinSet<Disposition> = JoinSet::new();
        loop {
            let event = tokio::select! {
                biased;
                changed = shutdown.changed() => Event::Signal(changed.is_ok()),
                Some(settled) = in_flight.join_next() => Event::Settled(settled),
                next = stream.next(), if in_flight.len() < concurrency => Event::Delivery(next),
            };

            match event {
                Event::Signal(true) if !*shutdown.borrow() => continue,
                Event::Signal(_) => {
                    self.stop().await;
                    stats.drain(&mut in_flight).await;
                    info!(consumer_tag = %tag, ?stats, "Render worker shut down");
                    return Ok(stats);
                }
                Event::Settled(settled) => stats.settle(settled),
                Event::Delivery(Some(Ok(delivery))) => {
                    let consumer = self.clone();
                    in_flight.spawn(async move { consumer.handle_delivery(&delivery).await });
                }
                Event::Delivery(Some(Err(e))) => {
                    warn!(consumer_tag = %tag, error = %e, "Request stream failed");
                    stats.drain(&mut in_flight).await;
                    return Err(e.into());
                }
                Event::Delivery(None) => {
                    warn!(consumer_tag = %tag, "Request stream ended");
                    stats.drain(&mut in_flight).await;
                    return Ok(stats);
                }
            }
        }
    }

    /// Serve a single delivery and settle it.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Disposition {
        metric_inc!(WORKER_REQUESTS_RECEIVED);

        let request = match self.decode(delivery) {
            Ok(request) => request,
            Err(e) => {
                metric_inc!(WORKER_REQUESTS_REJECTED, &[e.reason()]);
                warn!(
                    delivery_tag = delivery.delivery_tag,
                    correlation_id = ?delivery.correlation_id(),
                    error = %e,
                    "Rejecting render request"
                );
                if let Err(e) = delivery.nack(false).await {
                    warn!(delivery_tag = delivery.delivery_tag, error = %e, "Reject failed");
                }
                return Disposition::Rejected;
            }
        };

        let device_id = request.device.id.to_string();
        let correlation_id = request
            .correlation_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let age_ms = request
            .correlation_id
            .as_ref()
            .and_then(CorrelationId::age)
            .map(|age| age.as_millis() as u64);
        debug!(
            device_id = %device_id,
            correlation_id = %correlation_id,
            app_id = %request.app_id,
            redelivered = delivery.redelivered,
            age_ms = ?age_ms,
            "Rendering"
        );

        let rendered = {
            let _timer = time_histogram!(WORKER_RENDER_DURATION);
            self.handler.render(&request).await
        };
        let reply = match rendered {
            Ok(image) => {
                metric_inc!(WORKER_RENDERS, &["success"]);
                RenderReply::success(&request, &image)
            }
            Err(e) => {
                metric_inc!(WORKER_RENDERS, &["failure"]);
                warn!(
                    device_id = %device_id,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Render failed, replying with error"
                );
                RenderReply::failure(&request, e.to_string())
            }
        };
        let failed = reply.is_failure();

        match self.publish_reply(&request, &reply).await {
            Ok(()) => {
                WORKER_REPLIES_PUBLISHED.with_label_values(&["confirmed"]).inc();
                info!(
                    device_id = %device_id,
                    correlation_id = %correlation_id,
                    failed,
                    "Reply published"
                );
                if let Err(e) = delivery.ack().await {
                    warn!(delivery_tag = delivery.delivery_tag, error = %e, "Ack failed");
                }
                Disposition::Replied { failed }
            }
            Err(e) => {
                WORKER_REPLIES_PUBLISHED.with_label_values(&["failed"]).inc();
                warn!(
                    device_id = %device_id,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Reply not published, requeueing request"
                );
                if let Err(e) = delivery.nack(true).await {
                    warn!(delivery_tag = delivery.delivery_tag, error = %e, "Requeue failed");
                }
                Disposition::Requeued
            }
        }
    }

    fn decode(&self, delivery: &Delivery) -> Result<RenderRequest, WorkerError> {
        let request = RenderRequest::from_json_slice(&delivery.body)?;
        self.config.topology.check_device(&request.device.id)?;
        // Older clients only set the property.
        Ok(match (&request.correlation_id, delivery.correlation_id()) {
            (None, Some(id)) => request.with_correlation_id(CorrelationId::from_wire(id)),
            _ => request,
        })
    }

    async fn publish_reply(
        &self,
        request: &RenderRequest,
        reply: &RenderReply,
    ) -> Result<(), WorkerError> {
        let topology = &self.config.topology;
        let device_id = request.device.id.to_string();
        let failed = |reason: String| WorkerError::Publish {
            device_id: device_id.clone(),
            reason,
        };

        let body = reply.to_json_bytes().map_err(|e| failed(e.to_string()))?;
        let mut properties = MessageProperties::default()
            .with_content_type(CONTENT_TYPE_JSON)
            .persistent();
        if let Some(id) = &request.correlation_id {
            properties = properties.with_correlation_id(id.as_str());
        }
        let message = OutboundMessage {
            mandatory: false,
            ..OutboundMessage::new(
                topology.exchange.clone(),
                topology.reply_routing_key(&request.device.id),
                properties,
                body,
            )
        };

        match self.channel.publish(message).await {
            Ok(PublishOutcome::Confirmed) => Ok(()),
            Ok(PublishOutcome::Returned { reply_text }) => Err(failed(reply_text)),
            Ok(PublishOutcome::Nacked) => Err(failed("broker nacked the reply".to_string())),
            Err(e) => Err(failed(e.to_string())),
        }
    }

    async fn stop(&self) {
        if let Err(e) = self.channel.cancel(&self.config.consumer_tag).await {
            debug!(consumer_tag = %self.config.consumer_tag, error = %e, "Consumer cancel failed");
        }
    }
}
