//! # Reply Waiter
//!
//! Consumes a device's reply queue until an acceptable reply arrives, the
//! deadline passes or the caller cancels. The wait is a `tokio::select!` over
//! the delivery stream, a deadline timer and the cancel signal.
//!
//! Whatever the outcome, the consumer is cancelled and the channel closed,
//! so every message the waiter did not acknowledge goes back to the queue
//! for the next waiter.

use std::sync::Arc;
use std::time::Duration;

use matrx_bus::{BrokerChannel, BusError, Delivery, DeliveryStream};
use matrx_telemetry::{
    metric_inc, metric_observe, REPLIES_MATCHED, REPLIES_REJECTED, REPLY_LATENCY,
    WAITS_CANCELLED, WAITS_TIMED_OUT,
};
use matrx_types::{CorrelationId, DeviceId, Topology};
use tokio::time::{sleep_until, Instant};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_STALE_BACKOFF;
use crate::domain::{
    evaluate_reply, CancelSignal, ReplyMatching, StaleReplyPolicy, Verdict, WaitOutcome,
    WaiterState,
};
use crate::error::{RenderClientError, ReplyRejection};

enum Event {
    Cancelled,
    Deadline,
    Resume,
    Delivery(Option<Result<Delivery, BusError>>),
}

pub struct ReplyWaiter {
    channel: Arc<dyn BrokerChannel>,
    device_id: DeviceId,
    queue: String,
    consumer_tag: String,
    matching: ReplyMatching,
    stale_policy: StaleReplyPolicy,
    stale_backoff: Duration,
    stream: Option<DeliveryStream>,
    state: WaiterState,
}

impl ReplyWaiter {
    /// Waiter on the reply queue of `device_id`. The channel should be
    /// dedicated to this waiter; it is closed when the wait ends.
    pub fn new(channel: Arc<dyn BrokerChannel>, topology: &Topology, device_id: DeviceId) -> Self {
        let queue = topology.reply_queue_name(&device_id);
        Self {
            channel,
            consumer_tag: format!("matrx-waiter-{}", CorrelationId::new()),
            device_id,
            queue,
            matching: ReplyMatching::default(),
            stale_policy: StaleReplyPolicy::default(),
            stale_backoff: DEFAULT_STALE_BACKOFF,
            stream: None,
            state: WaiterState::Idle,
        }
    }

    #[must_use]
    pub fn with_matching(mut self, matching: ReplyMatching) -> Self {
        self.matching = matching;
        self
    }

    #[must_use]
    pub fn with_stale_policy(mut self, policy: StaleReplyPolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    #[must_use]
    pub fn with_stale_backoff(mut self, backoff: Duration) -> Self {
        self.stale_backoff = backoff;
        self
    }

    pub fn state(&self) -> WaiterState {
        self.state
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Start consuming the reply queue. Call before the request is published
    /// so no reply can slip past.
    pub async fn subscribe(&mut self) -> Result<(), RenderClientError> {
        if self.state != WaiterState::Idle {
            return Err(self.invalid_state());
        }
        match self.channel.consume(&self.queue, &self.consumer_tag).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = WaiterState::Subscribed;
                debug!(
                    device_id = %self.device_id,
                    queue = %self.queue,
                    consumer_tag = %self.consumer_tag,
                    "Subscribed to reply queue"
                );
                Ok(())
            }
            Err(source) => {
                self.state = WaiterState::Failed;
                self.release().await;
                Err(RenderClientError::Transport {
                    device_id: self.device_id.to_string(),
                    correlation_id: None,
                    source,
                })
            }
        }
    }

    /// Wait for the reply to `expected` (or, with matching disabled or no
    /// id, the first parsable reply). Subscribes first if still idle.
    pub async fn wait(
        &mut self,
        expected: Option<&CorrelationId>,
        timeout: Duration,
        cancel: &mut CancelSignal,
    ) -> Result<WaitOutcome, RenderClientError> {
        if self.state == WaiterState::Idle {
            self.subscribe().await?;
        }
        let Some(mut stream) = self.stream.take().filter(|_| self.state == WaiterState::Subscribed)
        else {
            return Err(self.invalid_state());
        };

        let started = Instant::now();
        // A timeout past what `Instant` can represent never expires.
        let deadline = started.checked_add(timeout);
        let mut backing_off = false;
        let mut resume_at: Option<Instant> = None;

        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => Event::Cancelled,
                () = sleep_until(deadline.unwrap_or(started)), if deadline.is_some() => Event::Deadline,
                () = sleep_until(resume_at.unwrap_or(started)), if resume_at.is_some() => Event::Resume,
                item = stream.next(), if !backing_off => Event::Delivery(item),
            };

            match event {
                Event::Cancelled => {
                    drop(stream);
                    self.finish(WaiterState::Cancelled).await;
                    WAITS_CANCELLED.inc();
                    info!(device_id = %self.device_id, queue = %self.queue, "Reply wait cancelled");
                    return Ok(WaitOutcome::Cancelled);
                }
                Event::Deadline => {
                    drop(stream);
                    self.finish(WaiterState::TimedOut).await;
                    WAITS_TIMED_OUT.inc();
                    warn!(
                        device_id = %self.device_id,
                        correlation_id = ?expected.map(CorrelationId::as_str),
                        timeout_ms = timeout.as_millis() as u64,
                        "No reply before deadline"
                    );
                    return Err(RenderClientError::Timeout {
                        device_id: self.device_id.to_string(),
                        correlation_id: expected.cloned(),
                        timeout,
                    });
                }
                Event::Resume => {
                    backing_off = false;
                    resume_at = None;
                }
                Event::Delivery(None) => {
                    drop(stream);
                    return Err(self.fail(expected, BusError::ChannelClosed).await);
                }
                Event::Delivery(Some(Err(source))) => {
                    drop(stream);
                    return Err(self.fail(expected, source).await);
                }
                Event::Delivery(Some(Ok(delivery))) => {
                    let verdict = evaluate_reply(
                        self.matching,
                        expected,
                        delivery.correlation_id(),
                        &delivery.body,
                    );
                    match verdict {
                        Verdict::Accept(reply) => {
                            if let Err(source) = delivery.ack().await {
                                drop(stream);
                                return Err(self.fail(expected, source).await);
                            }
                            drop(stream);
                            self.finish(WaiterState::Matched).await;
                            REPLIES_MATCHED.inc();
                            metric_observe!(REPLY_LATENCY, started.elapsed().as_secs_f64());
                            info!(
                                device_id = %self.device_id,
                                correlation_id = ?expected.map(CorrelationId::as_str),
                                redelivered = delivery.redelivered,
                                output_len = reply.render_output.len(),
                                failed = reply.is_failure(),
                                "Reply received"
                            );
                            return Ok(WaitOutcome::Reply(reply));
                        }
                        Verdict::Reject(rejection) => {
                            match self.skip(&delivery, &rejection).await {
                                Ok(backoff) => {
                                    if backoff {
                                        backing_off = true;
                                        resume_at = Instant::now().checked_add(self.stale_backoff);
                                    }
                                }
                                Err(source) => {
                                    drop(stream);
                                    return Err(self.fail(expected, source).await);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Give up without waiting, e.g. after the request failed to publish.
    pub async fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.stream = None;
        self.finish(WaiterState::Cancelled).await;
    }

    /// Settle a rejected delivery. Returns whether to back off before reading
    /// further.
    async fn skip(&mut self, delivery: &Delivery, rejection: &ReplyRejection) -> Result<bool, BusError> {
        metric_inc!(REPLIES_REJECTED, &[rejection.reason()]);

        if !rejection.is_stale() {
            warn!(
                device_id = %self.device_id,
                queue = %self.queue,
                delivery_tag = delivery.delivery_tag,
                rejection = %rejection,
                "Dropping malformed reply"
            );
            delivery.nack(false).await?;
            return Ok(false);
        }

        match self.stale_policy {
            StaleReplyPolicy::Requeue => {
                debug!(
                    device_id = %self.device_id,
                    rejection = %rejection,
                    "Requeueing reply for another request"
                );
                delivery.nack(true).await?;
                Ok(true)
            }
            StaleReplyPolicy::Discard => {
                info!(
                    device_id = %self.device_id,
                    rejection = %rejection,
                    "Discarding reply for another request"
                );
                delivery.ack().await?;
                Ok(false)
            }
        }
    }

    async fn fail(&mut self, expected: Option<&CorrelationId>, source: BusError) -> RenderClientError {
        warn!(device_id = %self.device_id, queue = %self.queue, error = %source, "Reply wait failed");
        self.finish(WaiterState::Failed).await;
        RenderClientError::Transport {
            device_id: self.device_id.to_string(),
            correlation_id: expected.cloned(),
            source,
        }
    }

    async fn finish(&mut self, state: WaiterState) {
        self.state = state;
        self.release().await;
    }

    /// Cancel the consumer and close the channel; the broker requeues every
    /// unacknowledged delivery.
    async fn release(&mut self) {
        if self.channel.is_open() {
            if let Err(e) = self.channel.cancel(&self.consumer_tag).await {
                debug!(consumer_tag = %self.consumer_tag, error = %e, "Consumer cancel failed");
            }
        }
        if let Err(e) = self.channel.close().await {
            debug!(queue = %self.queue, error = %e, "Channel close failed");
        }
    }

    fn invalid_state(&self) -> RenderClientError {
        RenderClientError::InvalidState {
            device_id: self.device_id.to_string(),
            state: self.state,
        }
    }
}
