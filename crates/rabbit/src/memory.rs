// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-process loopback broker.
//!
//! Implements enough of the AMQP model for the admin tools to run against it:
//! durable queues, topic, direct and fanout exchanges, the default exchange,
//! mandatory publishing, basic.get with ack/nack/requeue, exclusive reply
//! queues and channel loss. Delayed messages are delivered immediately.
//!
//! Tests drive the "other side" of the broker through the helpers on
//! [`MemoryBroker`]: inject work items, play a remote service with
//! [`MemoryBroker::next_request`] and [`MemoryBroker::respond`], or cut every
//! connection with [`MemoryBroker::drop_connections`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use crate::config::{ExchangeConfig, QueueConfig};
use crate::error::TransportError;
use crate::transport::{
    Channel, Connector, DEFAULT_EXCHANGE, IncomingMessage, OutgoingMessage, PublishOutcome,
    TransportResult,
};

/// A message sitting in a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub redelivered: bool,
}

impl StoredMessage {
    fn from_outgoing(message: &OutgoingMessage) -> Self {
        Self {
            exchange: message.exchange.clone(),
            routing_key: message.routing_key.clone(),
            body: message.body.clone(),
            correlation_id: message.correlation_id.clone(),
            reply_to: message.reply_to.clone(),
            redelivered: false,
        }
    }
}

#[derive(Debug)]
struct BindingRule {
    exchange: String,
    queue: String,
    pattern: String,
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    seq: u64,
    message: StoredMessage,
}

/// Ready messages in arrival order. The sequence number lets a requeued
/// message return to its original position.
type ReadyQueue = VecDeque<(u64, StoredMessage)>;

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, String>,
    queues: HashMap<String, ReadyQueue>,
    bindings: Vec<BindingRule>,
    /// Queues with a push consumer attached, keyed by queue name
    consumers: HashMap<String, mpsc::UnboundedSender<IncomingMessage>>,
    /// Exclusive queues owned by each channel
    exclusive: HashMap<u64, Vec<String>>,
    unacked: BTreeMap<(u64, u64), Unacked>,
    open_channels: HashSet<u64>,
    next_channel: u64,
    next_seq: u64,
    fail_connects: usize,
    connect_attempts: usize,
}

impl BrokerState {
    /// Queues an exchange delivers a routing key to
    fn route(&self, exchange: &str, routing_key: &str) -> Vec<String> {
        if exchange == DEFAULT_EXCHANGE {
            return if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            };
        }
        let kind = self.exchanges.get(exchange).map(String::as_str).unwrap_or("topic");
        let mut matched: Vec<String> = Vec::new();
        for rule in self.bindings.iter().filter(|b| b.exchange == exchange) {
            let hit = match kind {
                "fanout" => true,
                "direct" => rule.pattern == routing_key,
                _ => topic_matches(&rule.pattern, routing_key),
            };
            if hit && !matched.contains(&rule.queue) {
                matched.push(rule.queue.clone());
            }
        }
        matched
    }

    fn deliver(&mut self, queue: &str, message: StoredMessage) {
        if let Some(consumer) = self.consumers.get(queue) {
            let incoming = IncomingMessage {
                delivery_tag: 0,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                redelivered: message.redelivered,
                correlation_id: message.correlation_id.clone(),
                reply_to: message.reply_to.clone(),
                body: message.body.clone(),
            };
            if consumer.send(incoming).is_ok() {
                return;
            }
        }
        self.next_seq += 1;
        let seq = self.next_seq;
        self.queues
            .entry(queue.to_string())
            .or_default()
            .push_back((seq, message));
    }

    fn requeue(&mut self, unacked: Unacked) {
        let Unacked {
            queue,
            seq,
            mut message,
        } = unacked;
        message.redelivered = true;
        let ready = self.queues.entry(queue).or_default();
        let position = ready.partition_point(|(s, _)| *s < seq);
        ready.insert(position, (seq, message));
    }

    /// Return a channel's unacknowledged messages to the head of their
    /// queues, in their original order, and drop its exclusive queues
    fn release_channel(&mut self, channel: u64) {
        self.open_channels.remove(&channel);
        let tags: Vec<(u64, u64)> = self
            .unacked
            .range((channel, 0)..=(channel, u64::MAX))
            .map(|(key, _)| *key)
            .collect();
        for key in tags {
            if let Some(unacked) = self.unacked.remove(&key) {
                self.requeue(unacked);
            }
        }
        for queue in self.exclusive.remove(&channel).unwrap_or_default() {
            self.queues.remove(&queue);
            self.consumers.remove(&queue);
        }
    }
}

/// AMQP topic matching: `*` is exactly one word, `#` is zero or more
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.split_first(), key.split_first()) {
            (None, None) => true,
            (Some((&"#", rest)), _) => {
                matches(rest, key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some((&"*", rest)), Some((_, key_rest))) => matches(rest, key_rest),
            (Some((word, rest)), Some((key_word, key_rest))) if word == key_word => {
                matches(rest, key_rest)
            }
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

/// Shared handle on an in-memory broker. Clones see the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    published: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next_connects(&self, count: usize) {
        self.lock().fail_connects = count;
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Simulate the broker dropping every client connection
    pub fn drop_connections(&self) {
        let mut state = self.lock();
        let channels: Vec<u64> = state.open_channels.iter().copied().collect();
        for channel in channels {
            state.release_channel(channel);
        }
    }

    pub fn declare_exchange(&self, name: &str, kind: &str) {
        self.lock()
            .exchanges
            .insert(name.to_string(), kind.to_string());
    }

    /// Declare a queue bound to `exchange` with `pattern`, the way a remote
    /// service would on startup
    pub fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) {
        let mut state = self.lock();
        state.queues.entry(queue.to_string()).or_default();
        state.bindings.push(BindingRule {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            pattern: pattern.to_string(),
        });
    }

    /// Put a message straight onto a queue
    pub fn inject(&self, queue: &str, exchange: &str, routing_key: &str, body: Vec<u8>) {
        let message = StoredMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body,
            correlation_id: None,
            reply_to: None,
            redelivered: false,
        };
        self.lock().deliver(queue, message);
        self.published.notify_waiters();
    }

    /// Snapshot of the ready messages on a queue, head first
    pub fn messages(&self, queue: &str) -> Vec<StoredMessage> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn unacked_count(&self) -> usize {
        self.lock().unacked.len()
    }

    /// Wait for a message on `queue` and take it, as a remote service would
    pub async fn next_request(&self, queue: &str) -> StoredMessage {
        loop {
            let published = self.published.notified();
            if let Some(message) = self
                .lock()
                .queues
                .get_mut(queue)
                .and_then(VecDeque::pop_front)
            {
                return message.1;
            }
            published.await;
        }
    }

    /// Answer a request through the default exchange, echoing its
    /// correlation id. Returns false if the request had no reply address or
    /// the reply queue is gone.
    pub fn respond(&self, request: &StoredMessage, body: Vec<u8>) -> bool {
        let Some(reply_to) = request.reply_to.as_deref() else {
            return false;
        };
        let mut reply = OutgoingMessage::new(DEFAULT_EXCHANGE, reply_to, body);
        reply.correlation_id = request.correlation_id.clone();
        self.route_message(&reply) == PublishOutcome::Confirmed
    }

    fn route_message(&self, message: &OutgoingMessage) -> PublishOutcome {
        let mut state = self.lock();
        let queues = state.route(&message.exchange, &message.routing_key);
        if queues.is_empty() {
            return PublishOutcome::Unroutable;
        }
        for queue in queues {
            state.deliver(&queue, StoredMessage::from_outgoing(message));
        }
        drop(state);
        self.published.notify_waiters();
        PublishOutcome::Confirmed
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self) -> TransportResult<Box<dyn Channel>> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(TransportError::Connection("connection refused".to_string()));
        }
        state.next_channel += 1;
        let id = state.next_channel;
        state.open_channels.insert(id);
        Ok(Box::new(MemoryChannel {
            broker: self.clone(),
            id,
            next_tag: 0,
        }))
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
    id: u64,
    next_tag: u64,
}

impl MemoryChannel {
    fn check_open(&self) -> TransportResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TransportError::Connection("channel closed".to_string()))
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.broker.lock().open_channels.contains(&self.id)
    }

    async fn set_prefetch(&mut self, _count: u16) -> TransportResult<()> {
        self.check_open()
    }

    async fn enable_confirms(&mut self) -> TransportResult<()> {
        self.check_open()
    }

    async fn declare_exchange(&mut self, exchange: &ExchangeConfig) -> TransportResult<()> {
        self.check_open()?;
        let mut state = self.broker.lock();
        if let Some(existing) = state.exchanges.get(&exchange.name) {
            if *existing != exchange.kind {
                return Err(TransportError::Channel(format!(
                    "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{}'",
                    exchange.name
                )));
            }
        }
        state
            .exchanges
            .insert(exchange.name.clone(), exchange.kind.clone());
        Ok(())
    }

    async fn declare_queue(&mut self, queue: &QueueConfig) -> TransportResult<()> {
        self.check_open()?;
        let mut state = self.broker.lock();
        for binding in &queue.bindings {
            if !state.exchanges.contains_key(&binding.exchange) {
                return Err(TransportError::Channel(format!(
                    "NOT_FOUND - no exchange '{}'",
                    binding.exchange
                )));
            }
        }
        state.queues.entry(queue.name.clone()).or_default();
        for binding in &queue.bindings {
            let exists = state.bindings.iter().any(|b| {
                b.exchange == binding.exchange
                    && b.queue == queue.name
                    && b.pattern == binding.routing_key
            });
            if !exists {
                state.bindings.push(BindingRule {
                    exchange: binding.exchange.clone(),
                    queue: queue.name.clone(),
                    pattern: binding.routing_key.clone(),
                });
            }
        }
        Ok(())
    }

    async fn declare_reply_queue(
        &mut self,
    ) -> TransportResult<(String, mpsc::UnboundedReceiver<IncomingMessage>)> {
        self.check_open()?;
        let name = format!("amq.gen-{}", Uuid::new_v4().simple());
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.broker.lock();
        state.queues.insert(name.clone(), VecDeque::new());
        state.consumers.insert(name.clone(), sender);
        state.exclusive.entry(self.id).or_default().push(name.clone());
        Ok((name, receiver))
    }

    async fn publish(&mut self, message: &OutgoingMessage) -> TransportResult<PublishOutcome> {
        self.check_open()?;
        {
            let state = self.broker.lock();
            if message.exchange != DEFAULT_EXCHANGE
                && !state.exchanges.contains_key(&message.exchange)
            {
                return Err(TransportError::Channel(format!(
                    "NOT_FOUND - no exchange '{}'",
                    message.exchange
                )));
            }
        }
        match self.broker.route_message(message) {
            // without mandatory the broker silently drops what it cannot route
            PublishOutcome::Unroutable if !message.mandatory => Ok(PublishOutcome::Confirmed),
            outcome => Ok(outcome),
        }
    }

    async fn get(&mut self, queue: &str) -> TransportResult<Option<IncomingMessage>> {
        self.check_open()?;
        let mut state = self.broker.lock();
        let next = match state.queues.get_mut(queue) {
            Some(ready) => ready.pop_front(),
            None => {
                return Err(TransportError::Channel(format!(
                    "NOT_FOUND - no queue '{queue}'"
                )));
            }
        };
        let Some((seq, message)) = next else {
            return Ok(None);
        };
        self.next_tag += 1;
        let incoming = IncomingMessage {
            delivery_tag: self.next_tag,
            exchange: message.exchange.clone(),
            routing_key: message.routing_key.clone(),
            redelivered: message.redelivered,
            correlation_id: message.correlation_id.clone(),
            reply_to: message.reply_to.clone(),
            body: message.body.clone(),
        };
        state.unacked.insert(
            (self.id, self.next_tag),
            Unacked {
                queue: queue.to_string(),
                seq,
                message,
            },
        );
        Ok(Some(incoming))
    }

    async fn ack(&mut self, delivery_tag: u64) -> TransportResult<()> {
        self.check_open()?;
        match self.broker.lock().unacked.remove(&(self.id, delivery_tag)) {
            Some(_) => Ok(()),
            None => Err(TransportError::Channel(format!(
                "PRECONDITION_FAILED - unknown delivery tag {delivery_tag}"
            ))),
        }
    }

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> TransportResult<()> {
        self.check_open()?;
        let mut state = self.broker.lock();
        let Some(unacked) = state.unacked.remove(&(self.id, delivery_tag)) else {
            return Err(TransportError::Channel(format!(
                "PRECONDITION_FAILED - unknown delivery tag {delivery_tag}"
            )));
        };
        if requeue {
            state.requeue(unacked);
        }
        drop(state);
        if requeue {
            self.broker.published.notify_waiters();
        }
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.broker.lock().release_channel(self.id);
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.broker.lock().release_channel(self.id);
    }
}
