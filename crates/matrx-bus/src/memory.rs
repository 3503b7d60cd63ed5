//! # In-Memory Broker
//!
//! An in-process broker implementing the AMQP 0-9-1 behaviour the render
//! protocol relies on:
//!
//! - direct, fanout and topic exchanges plus the default (`""`) exchange
//! - idempotent declares; inequivalent re-declares fail and close the channel
//! - manual acknowledgement, `nack` with and without requeue
//! - per-channel prefetch with round-robin dispatch across consumers
//! - unacknowledged messages requeued (in order) when a channel closes
//! - mandatory publishes returned when unroutable
//! - [`InMemoryBroker::restart`]: transient entities and messages are lost,
//!   durable queues keep their persistent messages
//!
//! All state sits behind one `parking_lot::Mutex`; no lock is held across an
//! `.await`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::channel::{Broker, BrokerChannel, DeliveryStream};
use crate::error::BusError;
use crate::message::{
    Acknowledger, Binding, Delivery, DeliveryMode, ExchangeKind, ExchangeSpec, MessageProperties,
    OutboundMessage, PublishOutcome, QueueInfo, QueueSpec,
};
use crate::topic::topic_matches;
use crate::MAX_NAME_LEN;

/// Reply text of a returned mandatory message.
const NO_ROUTE: &str = "NO_ROUTE";

/// A message sitting in a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

type DeliverySender = mpsc::UnboundedSender<Result<Delivery, BusError>>;

struct ConsumerState {
    tag: String,
    channel_id: u64,
    sender: DeliverySender,
}

struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<QueuedMessage>,
    consumers: Vec<ConsumerState>,
    next_consumer: usize,
}

impl QueueState {
    fn new(spec: QueueSpec) -> Self {
        Self {
            spec,
            ready: VecDeque::new(),
            consumers: Vec::new(),
            next_consumer: 0,
        }
    }

    fn info(&self) -> QueueInfo {
        QueueInfo {
            name: self.spec.name.clone(),
            message_count: u32::try_from(self.ready.len()).unwrap_or(u32::MAX),
            consumer_count: u32::try_from(self.consumers.len()).unwrap_or(u32::MAX),
        }
    }
}

struct Unacked {
    queue: String,
    message: QueuedMessage,
}

#[derive(Default)]
struct ChannelState {
    prefetch: u16,
    next_tag: u64,
    unacked: BTreeMap<u64, Unacked>,
}

impl ChannelState {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.unacked.len() < usize::from(self.prefetch)
    }
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueState>,
    bindings: BTreeSet<Binding>,
    channels: HashMap<u64, ChannelState>,
    next_channel_id: u64,
    next_generated_queue: u64,
    nack_publishes: bool,
    /// Handed to acknowledgers; deliveries buffered in consumer streams must
    /// not keep the broker alive.
    weak_self: Weak<Mutex<BrokerState>>,
}

impl BrokerState {
    fn ensure_open(&self, channel_id: u64) -> Result<(), BusError> {
        if self.channels.contains_key(&channel_id) {
            Ok(())
        } else {
            Err(BusError::ChannelClosed)
        }
    }

    /// Close the channel as a side effect of a channel-level error.
    fn fail(&mut self, channel_id: u64, error: BusError) -> BusError {
        warn!(channel = channel_id, error = %error, "Channel closed by broker");
        self.close_channel(channel_id);
        error
    }

    fn close_channel(&mut self, channel_id: u64) {
        let Some(channel) = self.channels.remove(&channel_id) else {
            return;
        };

        let mut touched: BTreeSet<String> = BTreeSet::new();
        for (name, queue) in &mut self.queues {
            let before = queue.consumers.len();
            queue.consumers.retain(|c| c.channel_id != channel_id);
            if queue.consumers.len() != before {
                touched.insert(name.clone());
            }
        }

        // Requeue in reverse tag order so the oldest delivery ends up first.
        for (_, unacked) in channel.unacked.into_iter().rev() {
            if let Some(queue) = self.queues.get_mut(&unacked.queue) {
                let mut message = unacked.message;
                message.redelivered = true;
                queue.ready.push_front(message);
                touched.insert(unacked.queue);
            }
        }

        for name in &touched {
            self.delete_if_unused(name);
        }
        self.dispatch_all();
        debug!(channel = channel_id, "Channel closed");
    }

    fn delete_if_unused(&mut self, queue_name: &str) {
        let unused = self
            .queues
            .get(queue_name)
            .is_some_and(|q| q.spec.auto_delete && q.consumers.is_empty());
        if unused {
            self.queues.remove(queue_name);
            self.bindings.retain(|b| b.queue != queue_name);
            debug!(queue = queue_name, "Auto-deleted queue");
        }
    }

    fn route(&self, exchange: &str, routing_key: &str) -> BTreeSet<String> {
        if exchange.is_empty() {
            return self
                .queues
                .contains_key(routing_key)
                .then(|| routing_key.to_string())
                .into_iter()
                .collect();
        }

        let Some(spec) = self.exchanges.get(exchange) else {
            return BTreeSet::new();
        };

        self.bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .filter(|b| match spec.kind {
                ExchangeKind::Direct => b.routing_key == routing_key,
                ExchangeKind::Fanout => true,
                ExchangeKind::Topic => topic_matches(&b.routing_key, routing_key),
            })
            .map(|b| b.queue.clone())
            .collect()
    }

    fn dispatch_all(&mut self) {
        let names: Vec<String> = self.queues.keys().cloned().collect();
        for name in names {
            self.dispatch(&name);
        }
    }

    /// Hand ready messages to consumers with spare prefetch capacity.
    fn dispatch(&mut self, queue_name: &str) {
        loop {
            let Some(queue) = self.queues.get_mut(queue_name) else {
                return;
            };
            queue.consumers.retain(|c| !c.sender.is_closed());
            if queue.ready.is_empty() || queue.consumers.is_empty() {
                return;
            }

            let count = queue.consumers.len();
            let start = queue.next_consumer % count;
            let channels = &self.channels;
            let picked = (0..count).map(|i| (start + i) % count).find(|&idx| {
                channels
                    .get(&queue.consumers[idx].channel_id)
                    .is_some_and(ChannelState::has_capacity)
            });
            let Some(idx) = picked else {
                return;
            };
            queue.next_consumer = idx + 1;

            let Some(message) = queue.ready.pop_front() else {
                return;
            };
            let channel_id = queue.consumers[idx].channel_id;
            let sender = queue.consumers[idx].sender.clone();
            let consumer_tag = queue.consumers[idx].tag.clone();

            let Some(channel) = self.channels.get_mut(&channel_id) else {
                return;
            };
            channel.next_tag += 1;
            let tag = channel.next_tag;
            channel.unacked.insert(
                tag,
                Unacked {
                    queue: queue_name.to_string(),
                    message: message.clone(),
                },
            );

            let delivery = Delivery::new(
                tag,
                message.exchange,
                message.routing_key,
                message.redelivered,
                message.properties,
                message.body,
                Box::new(InMemoryAcker {
                    state: self.weak_self.clone(),
                    channel_id,
                    tag,
                }),
            );

            if sender.send(Ok(delivery)).is_err() {
                // Receiver dropped between the liveness check and the send.
                if let Some(channel) = self.channels.get_mut(&channel_id) {
                    if let Some(unacked) = channel.unacked.remove(&tag) {
                        if let Some(queue) = self.queues.get_mut(queue_name) {
                            queue.ready.push_front(unacked.message);
                            queue.consumers.retain(|c| c.tag != consumer_tag);
                        }
                    }
                }
            }
        }
    }

    fn settle(&mut self, channel_id: u64, tag: u64, requeue: Option<bool>) -> Result<(), BusError> {
        self.ensure_open(channel_id)?;
        let removed = self
            .channels
            .get_mut(&channel_id)
            .and_then(|c| c.unacked.remove(&tag));
        let Some(unacked) = removed else {
            return Err(self.fail(channel_id, BusError::UnknownDeliveryTag(tag)));
        };

        if requeue == Some(true) {
            if let Some(queue) = self.queues.get_mut(&unacked.queue) {
                let mut message = unacked.message;
                message.redelivered = true;
                queue.ready.push_front(message);
            }
        }
        self.dispatch_all();
        Ok(())
    }
}

/// In-process broker. Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        let inner = Arc::new_cyclic(|weak| {
            Mutex::new(BrokerState {
                weak_self: weak.clone(),
                ..BrokerState::default()
            })
        });
        Self { inner }
    }

    /// Open a channel with its concrete type.
    #[must_use]
    pub fn channel(&self) -> InMemoryChannel {
        let mut shared = self.inner.lock();
        shared.next_channel_id += 1;
        let id = shared.next_channel_id;
        shared.channels.insert(id, ChannelState::default());
        debug!(channel = id, "Channel opened");
        InMemoryChannel {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Simulate a broker restart: every channel closes (requeueing its
    /// unacknowledged messages), then non-durable exchanges and queues
    /// disappear and durable queues keep only persistent messages.
    pub fn restart(&self) {
        let mut shared = self.inner.lock();
        let ids: Vec<u64> = shared.channels.keys().copied().collect();
        for id in ids {
            shared.close_channel(id);
        }

        shared.exchanges.retain(|_, spec| spec.durable);
        shared.queues.retain(|_, q| q.spec.durable);
        for queue in shared.queues.values_mut() {
            queue.consumers.clear();
            queue
                .ready
                .retain(|m| m.properties.delivery_mode == DeliveryMode::Persistent);
        }

        let state = &mut *shared;
        let (exchanges, queues) = (&state.exchanges, &state.queues);
        state
            .bindings
            .retain(|b| exchanges.contains_key(&b.exchange) && queues.contains_key(&b.queue));
        debug!(
            exchanges = state.exchanges.len(),
            queues = state.queues.len(),
            "Broker restarted"
        );
    }

    /// Make every following publish come back nacked (or stop doing so).
    pub fn set_nack_publishes(&self, nack: bool) {
        self.inner.lock().nack_publishes = nack;
    }

    #[must_use]
    pub fn has_exchange(&self, name: &str) -> bool {
        self.inner.lock().exchanges.contains_key(name)
    }

    #[must_use]
    pub fn has_queue(&self, name: &str) -> bool {
        self.inner.lock().queues.contains_key(name)
    }

    #[must_use]
    pub fn queue_info(&self, name: &str) -> Option<QueueInfo> {
        self.inner.lock().queues.get(name).map(QueueState::info)
    }

    /// Ready (not yet delivered) messages of a queue, head first.
    #[must_use]
    pub fn queued_messages(&self, name: &str) -> Vec<QueuedMessage> {
        self.inner
            .lock()
            .queues
            .get(name)
            .map(|q| q.ready.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn bindings(&self) -> Vec<Binding> {
        self.inner.lock().bindings.iter().cloned().collect()
    }

    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.inner.lock().bindings.len()
    }

    /// Deliveries handed out but not yet settled, across all channels.
    #[must_use]
    pub fn unacked_count(&self) -> usize {
        self.inner
            .lock()
            .channels
            .values()
            .map(|c| c.unacked.len())
            .sum()
    }

    #[must_use]
    pub fn open_channel_count(&self) -> usize {
        self.inner.lock().channels.len()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, BusError> {
        Ok(Arc::new(self.channel()))
    }
}

/// A channel on an [`InMemoryBroker`]. Closed on drop.
pub struct InMemoryChannel {
    id: u64,
    inner: Arc<Mutex<BrokerState>>,
}

impl InMemoryChannel {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

fn check_name(name: &str) -> Result<(), BusError> {
    if name.len() > MAX_NAME_LEN {
        return Err(BusError::Protocol(format!(
            "name longer than {MAX_NAME_LEN} bytes"
        )));
    }
    Ok(())
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    fn is_open(&self) -> bool {
        self.inner.lock().channels.contains_key(&self.id)
    }

    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BusError> {
        check_name(&spec.name)?;
        let mut shared = self.inner.lock();
        shared.ensure_open(self.id)?;

        if let Some(existing) = shared.exchanges.get(&spec.name) {
            if existing != spec {
                let error = BusError::PreconditionFailed(format!(
                    "inequivalent arguments for exchange '{}'",
                    spec.name
                ));
                return Err(shared.fail(self.id, error));
            }
            return Ok(());
        }

        shared.exchanges.insert(spec.name.clone(), spec.clone());
        debug!(exchange = %spec.name, kind = ?spec.kind, "Exchange declared");
        Ok(())
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<QueueInfo, BusError> {
        check_name(&spec.name)?;
        let mut shared = self.inner.lock();
        shared.ensure_open(self.id)?;

        let mut spec = spec.clone();
        if spec.name.is_empty() {
            shared.next_generated_queue += 1;
            spec.name = format!("amq.gen-{}", shared.next_generated_queue);
        }

        if let Some(existing) = shared.queues.get(&spec.name) {
            if !existing.spec.is_equivalent(&spec) {
                let error = BusError::PreconditionFailed(format!(
                    "inequivalent arguments for queue '{}'",
                    spec.name
                ));
                return Err(shared.fail(self.id, error));
            }
            return Ok(existing.info());
        }

        let queue = QueueState::new(spec.clone());
        let info = queue.info();
        shared.queues.insert(spec.name.clone(), queue);
        debug!(queue = %spec.name, durable = spec.durable, "Queue declared");
        Ok(info)
    }

    async fn bind_queue(&self, binding: &Binding) -> Result<(), BusError> {
        check_name(&binding.routing_key)?;
        let mut shared = self.inner.lock();
        shared.ensure_open(self.id)?;

        if !shared.queues.contains_key(&binding.queue) {
            let error = BusError::NotFound(format!("queue '{}'", binding.queue));
            return Err(shared.fail(self.id, error));
        }
        if !shared.exchanges.contains_key(&binding.exchange) {
            let error = BusError::NotFound(format!("exchange '{}'", binding.exchange));
            return Err(shared.fail(self.id, error));
        }

        if shared.bindings.insert(binding.clone()) {
            debug!(
                queue = %binding.queue,
                exchange = %binding.exchange,
                routing_key = %binding.routing_key,
                "Queue bound"
            );
        }
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BusError> {
        let mut shared = self.inner.lock();
        shared.ensure_open(self.id)?;
        if let Some(channel) = shared.channels.get_mut(&self.id) {
            channel.prefetch = count;
        }
        shared.dispatch_all();
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<PublishOutcome, BusError> {
        check_name(&message.routing_key)?;
        let mut shared = self.inner.lock();
        shared.ensure_open(self.id)?;

        if !message.exchange.is_empty() && !shared.exchanges.contains_key(&message.exchange) {
            let error = BusError::NotFound(format!("exchange '{}'", message.exchange));
            return Err(shared.fail(self.id, error));
        }
        if shared.nack_publishes {
            return Ok(PublishOutcome::Nacked);
        }

        let targets = shared.route(&message.exchange, &message.routing_key);
        if targets.is_empty() {
            if message.mandatory {
                debug!(
                    exchange = %message.exchange,
                    routing_key = %message.routing_key,
                    "Mandatory message returned"
                );
                return Ok(PublishOutcome::Returned {
                    reply_text: NO_ROUTE.to_string(),
                });
            }
            return Ok(PublishOutcome::Confirmed);
        }

        let queued = QueuedMessage {
            exchange: message.exchange,
            routing_key: message.routing_key,
            properties: message.properties,
            body: message.body,
            redelivered: false,
        };
        for name in &targets {
            if let Some(queue) = shared.queues.get_mut(name) {
                queue.ready.push_back(queued.clone());
            }
        }
        for name in &targets {
            shared.dispatch(name);
        }
        Ok(PublishOutcome::Confirmed)
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BusError> {
        let mut shared = self.inner.lock();
        shared.ensure_open(self.id)?;

        let Some(state) = shared.queues.get_mut(queue) else {
            let error = BusError::NotFound(format!("queue '{queue}'"));
            return Err(shared.fail(self.id, error));
        };
        if state
            .consumers
            .iter()
            .any(|c| c.channel_id == self.id && c.tag == consumer_tag)
        {
            return Err(BusError::Protocol(format!(
                "consumer tag '{consumer_tag}' already in use"
            )));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.consumers.push(ConsumerState {
            tag: consumer_tag.to_string(),
            channel_id: self.id,
            sender,
        });
        shared.dispatch(queue);
        debug!(queue, consumer_tag, "Consumer started");
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BusError> {
        let mut shared = self.inner.lock();
        shared.ensure_open(self.id)?;

        let mut touched = Vec::new();
        for (name, queue) in &mut shared.queues {
            let before = queue.consumers.len();
            queue
                .consumers
                .retain(|c| !(c.channel_id == self.id && c.tag == consumer_tag));
            if queue.consumers.len() != before {
                touched.push(name.clone());
            }
        }
        for name in &touched {
            shared.delete_if_unused(name);
        }
        shared.dispatch_all();
        debug!(consumer_tag, "Consumer cancelled");
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.inner.lock().close_channel(self.id);
        Ok(())
    }
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        self.inner.lock().close_channel(self.id);
    }
}

struct InMemoryAcker {
    state: Weak<Mutex<BrokerState>>,
    channel_id: u64,
    tag: u64,
}

impl InMemoryAcker {
    fn settle(&self, requeue: Option<bool>) -> Result<(), BusError> {
        let Some(state) = self.state.upgrade() else {
            return Err(BusError::Connection("broker dropped".into()));
        };
        let mut shared = state.lock();
        shared.settle(self.channel_id, self.tag, requeue)
    }
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self) -> Result<(), BusError> {
        self.settle(None)
    }

    async fn nack(&self, requeue: bool) -> Result<(), BusError> {
        self.settle(Some(requeue))
    }
}
