// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Broker connection manager.
//!
//! A channel must not be used from two places at once, so one task owns it
//! and every operation (publish, get, ack, nack, reply routing) is sent to
//! that task as a [`Command`]. [`ConnectionHandle`] is the cheap, cloneable
//! front end other tasks and threads use.
//!
//! The task moves through `Disconnected -> Connecting -> Connected`, and back
//! to `Connecting` whenever the transport reports a connection failure.
//! Connecting and publishing retry such failures forever with the configured
//! backoff. Refused operations are returned to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::config::{ExchangeConfig, QueueConfig, RabbitSettings};
use crate::error::{RabbitError, Result, TransportError};
use crate::retry::{Delays, RetryPolicy};
use crate::transport::{
    Channel, Connector, IncomingMessage, OutgoingMessage, PublishOutcome, TransportResult,
};

/// Unacknowledged messages a channel may hold
const PREFETCH: u16 = 1;
const COMMAND_BUFFER: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Declarations made every time a channel is opened
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub exchanges: Vec<ExchangeConfig>,
    pub queues: Vec<QueueConfig>,
    /// Open a private reply queue for RPC responses
    pub reply_queue: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub retry: RetryPolicy,
    /// Longest wait for a publish confirmation before the connection is
    /// considered blocked and replaced
    pub confirm_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            confirm_timeout: Duration::from_secs(1800),
        }
    }
}

impl ConnectionOptions {
    pub fn from_settings(settings: &RabbitSettings) -> Self {
        Self {
            retry: RetryPolicy::default(),
            confirm_timeout: settings.timeout,
        }
    }
}

/// Delivery tag qualified by the channel it was received on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag {
    generation: u64,
    tag: u64,
}

impl DeliveryTag {
    pub fn value(&self) -> u64 {
        self.tag
    }
}

/// A message fetched from a queue, awaiting ack or nack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub body: Vec<u8>,
}

/// Receives the body of the reply to one request
pub type ReplyReceiver = oneshot::Receiver<Vec<u8>>;

type Responder<T> = oneshot::Sender<Result<T>>;

enum Command {
    Connect {
        reply: Responder<()>,
    },
    Publish {
        message: OutgoingMessage,
        reply: Responder<PublishOutcome>,
    },
    Request {
        message: OutgoingMessage,
        correlation_id: String,
        reply: Responder<(PublishOutcome, ReplyReceiver)>,
    },
    ForgetReply {
        correlation_id: String,
    },
    Get {
        queue: String,
        reply: Responder<Option<Delivery>>,
    },
    Settle {
        tag: DeliveryTag,
        verdict: Verdict,
        reply: Responder<()>,
    },
    Close {
        reply: Responder<()>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Verdict {
    Ack,
    Nack { requeue: bool },
}

/// Front end of a connection task. Clones share the same connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Connect { .. } => "Connect",
            Command::Publish { .. } => "Publish",
            Command::Request { .. } => "Request",
            Command::ForgetReply { .. } => "ForgetReply",
            Command::Get { .. } => "Get",
            Command::Settle { .. } => "Settle",
            Command::Close { .. } => "Close",
        };
        f.write_str(name)
    }
}

impl ConnectionHandle {
    /// Start the connection task. Nothing is opened until the first command.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        topology: Topology,
        options: ConnectionOptions,
    ) -> Self {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let actor = ConnectionActor {
            connector,
            topology,
            options,
            channel: None,
            generation: 0,
            reply_queue: None,
            replies: None,
            pending: HashMap::new(),
            state: state_tx,
        };
        tokio::spawn(actor.run(receiver));
        Self { commands, state }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn call<T>(&self, command: impl FnOnce(Responder<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| RabbitError::Closed)?;
        response.await.map_err(|_| RabbitError::Closed)?
    }

    /// Open the connection now instead of on first use
    pub async fn connect(&self) -> Result<()> {
        self.call(|reply| Command::Connect { reply }).await
    }

    pub async fn publish(&self, message: OutgoingMessage) -> Result<PublishOutcome> {
        self.call(|reply| Command::Publish { message, reply }).await
    }

    /// Publish a request carrying `correlation_id` and the reply queue, and
    /// register for its reply
    pub async fn request(
        &self,
        message: OutgoingMessage,
        correlation_id: String,
    ) -> Result<(PublishOutcome, ReplyReceiver)> {
        self.call(|reply| Command::Request {
            message,
            correlation_id,
            reply,
        })
        .await
    }

    /// Stop waiting for a reply. A reply arriving later is discarded.
    pub async fn forget_reply(&self, correlation_id: &str) {
        let command = Command::ForgetReply {
            correlation_id: correlation_id.to_string(),
        };
        // a closed connection has no pending replies left to forget
        let _ = self.commands.send(command).await;
    }

    /// Fetch one message from `queue`, `None` if it is empty
    pub async fn get(&self, queue: &str) -> Result<Option<Delivery>> {
        let queue = queue.to_string();
        self.call(|reply| Command::Get { queue, reply }).await
    }

    pub async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        self.call(|reply| Command::Settle {
            tag,
            verdict: Verdict::Ack,
            reply,
        })
        .await
    }

    pub async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<()> {
        self.call(|reply| Command::Settle {
            tag,
            verdict: Verdict::Nack { requeue },
            reply,
        })
        .await
    }

    /// Close the channel and stop the connection task
    pub async fn close(&self) -> Result<()> {
        match self.call(|reply| Command::Close { reply }).await {
            Err(RabbitError::Closed) => Ok(()),
            other => other,
        }
    }
}

struct ConnectionActor {
    connector: Arc<dyn Connector>,
    topology: Topology,
    options: ConnectionOptions,
    channel: Option<Box<dyn Channel>>,
    /// Incremented on every successful open
    generation: u64,
    reply_queue: Option<String>,
    replies: Option<mpsc::UnboundedReceiver<IncomingMessage>>,
    /// Reply waiters by correlation id
    pending: HashMap<String, oneshot::Sender<Vec<u8>>>,
    state: watch::Sender<ConnectionState>,
}

async fn next_reply(
    replies: &mut Option<mpsc::UnboundedReceiver<IncomingMessage>>,
) -> Option<IncomingMessage> {
    match replies {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ConnectionActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close { reply }) => {
                        let _ = reply.send(self.shutdown().await);
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        let _ = self.shutdown().await;
                        break;
                    }
                },
                message = next_reply(&mut self.replies) => match message {
                    Some(message) => self.dispatch_reply(message),
                    None => self.replies = None,
                },
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let _ = reply.send(self.ensure_connected().await);
            }
            Command::Publish { mut message, reply } => {
                let _ = reply.send(self.publish(&mut message, false).await);
            }
            Command::Request {
                message,
                correlation_id,
                reply,
            } => {
                let _ = reply.send(self.request(message, correlation_id).await);
            }
            Command::ForgetReply { correlation_id } => {
                self.pending.remove(&correlation_id);
            }
            Command::Get { queue, reply } => {
                let _ = reply.send(self.get(&queue).await);
            }
            Command::Settle {
                tag,
                verdict,
                reply,
            } => {
                let _ = reply.send(self.settle(tag, verdict).await);
            }
            Command::Close { reply } => {
                let _ = reply.send(self.shutdown().await);
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn channel(&mut self) -> TransportResult<&mut Box<dyn Channel>> {
        self.channel
            .as_mut()
            .ok_or_else(|| TransportError::Connection("no open channel".to_string()))
    }

    fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_open())
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.reset().await;
        self.set_state(ConnectionState::Connecting);

        let mut delays = self.options.retry.delays();
        loop {
            match self.open().await {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    let generation = self.generation;
                    diagnostics::info!("Connected to broker, channel generation {generation}", generation: generation);
                    return Ok(());
                }
                Err(err) if err.is_connection() => {
                    let delay = Self::next_delay(&mut delays, &self.options.retry);
                    let delay_ms = millis(delay);
                    let err = err.to_string();
                    diagnostics::warn!("Broker connection failed, retrying in {delay_ms} ms: {err}", delay_ms: delay_ms, err: err.as_str());
                    self.reset().await;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.reset().await;
                    self.set_state(ConnectionState::Disconnected);
                    return Err(err.into());
                }
            }
        }
    }

    /// Open a channel and declare the topology on it
    async fn open(&mut self) -> TransportResult<()> {
        let mut channel = self.connector.connect().await?;
        channel.set_prefetch(PREFETCH).await?;
        channel.enable_confirms().await?;
        for exchange in &self.topology.exchanges {
            channel.declare_exchange(exchange).await?;
        }
        for queue in &self.topology.queues {
            channel.declare_queue(queue).await?;
        }
        if self.topology.reply_queue {
            let (name, replies) = channel.declare_reply_queue().await?;
            diagnostics::debug!("Declared reply queue {name}", name: name);
            self.reply_queue = Some(name);
            self.replies = Some(replies);
        }
        self.generation += 1;
        self.channel = Some(channel);
        Ok(())
    }

    /// Drop the current channel. Pending replies stay registered: their
    /// callers time out on their own.
    async fn reset(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if channel.is_open() {
                let _ = tokio::time::timeout(CLOSE_GRACE, channel.close()).await;
            }
        }
        self.reply_queue = None;
        self.replies = None;
    }

    fn next_delay(delays: &mut Delays, policy: &RetryPolicy) -> Duration {
        delays.next().unwrap_or(policy.max_delay)
    }

    /// Reset after a connection failure and wait out the next backoff delay
    async fn recover(&mut self, err: &TransportError, delays: &mut Delays) {
        let delay = Self::next_delay(delays, &self.options.retry);
        let delay_ms = millis(delay);
        let err = err.to_string();
        diagnostics::warn!("Lost broker connection, reconnecting in {delay_ms} ms: {err}", delay_ms: delay_ms, err: err.as_str());
        self.reset().await;
        self.set_state(ConnectionState::Connecting);
        tokio::time::sleep(delay).await;
    }

    async fn publish(
        &mut self,
        message: &mut OutgoingMessage,
        with_reply: bool,
    ) -> Result<PublishOutcome> {
        let mut delays = self.options.retry.delays();
        loop {
            self.ensure_connected().await?;
            if with_reply {
                // the reply queue is renamed on every reconnect
                match &self.reply_queue {
                    Some(queue) => message.reply_to = Some(queue.clone()),
                    None => {
                        return Err(RabbitError::config(
                            "Connection was opened without a reply queue",
                        ));
                    }
                }
            }

            let confirm_timeout = self.options.confirm_timeout;
            let result = match self.channel() {
                Ok(channel) => {
                    match tokio::time::timeout(confirm_timeout, channel.publish(message)).await {
                        Ok(result) => result,
                        Err(_) => Err(TransportError::Connection(
                            "timed out waiting for publish confirmation".to_string(),
                        )),
                    }
                }
                Err(err) => Err(err),
            };

            match result {
                Ok(PublishOutcome::Unroutable) => {
                    let routing_key = message.routing_key.clone();
                    let exchange = message.exchange.clone();
                    diagnostics::error!(
                        "Message to {routing_key} on exchange {exchange} could not be routed",
                        routing_key: routing_key,
                        exchange: exchange
                    );
                    return Ok(PublishOutcome::Unroutable);
                }
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_connection() => self.recover(&err, &mut delays).await,
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn request(
        &mut self,
        mut message: OutgoingMessage,
        correlation_id: String,
    ) -> Result<(PublishOutcome, ReplyReceiver)> {
        if self.pending.contains_key(&correlation_id) {
            return Err(RabbitError::DuplicateCorrelation(correlation_id));
        }
        let (waiter, receiver) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), waiter);
        message.correlation_id = Some(correlation_id.clone());

        let outcome = self.publish(&mut message, true).await;
        if !matches!(outcome, Ok(PublishOutcome::Confirmed)) {
            self.pending.remove(&correlation_id);
        }
        outcome.map(|outcome| (outcome, receiver))
    }

    fn dispatch_reply(&mut self, message: IncomingMessage) {
        let Some(correlation_id) = message.correlation_id.as_deref() else {
            diagnostics::warn!("Discarding reply without a correlation id");
            return;
        };
        match self.pending.remove(correlation_id) {
            Some(waiter) => {
                // the caller may have given up in the meantime
                let _ = waiter.send(message.body);
            }
            None => {
                diagnostics::debug!("Discarding late reply {correlation_id}", correlation_id: correlation_id);
            }
        }
    }

    async fn get(&mut self, queue: &str) -> Result<Option<Delivery>> {
        let mut delays = self.options.retry.delays();
        loop {
            self.ensure_connected().await?;
            let result = match self.channel() {
                Ok(channel) => channel.get(queue).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(message) => {
                    let generation = self.generation;
                    return Ok(message.map(|m| Delivery {
                        tag: DeliveryTag {
                            generation,
                            tag: m.delivery_tag,
                        },
                        exchange: m.exchange,
                        routing_key: m.routing_key,
                        redelivered: m.redelivered,
                        body: m.body,
                    }));
                }
                Err(err) if err.is_connection() => self.recover(&err, &mut delays).await,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Ack or nack on the channel the delivery came from. If that channel
    /// is gone the broker has already requeued the message.
    async fn settle(&mut self, tag: DeliveryTag, verdict: Verdict) -> Result<()> {
        if tag.generation != self.generation || !self.is_connected() {
            let delivery_tag = tag.tag;
            diagnostics::warn!("Not settling delivery {delivery_tag} from a closed channel", delivery_tag: delivery_tag);
            return Err(RabbitError::StaleDelivery { delivery_tag });
        }
        let channel = self.channel()?;
        let result = match verdict {
            Verdict::Ack => channel.ack(tag.tag).await,
            Verdict::Nack { requeue } => channel.nack(tag.tag, requeue).await,
        };
        if let Err(err) = &result {
            if err.is_connection() {
                self.reset().await;
                self.set_state(ConnectionState::Connecting);
            }
        }
        Ok(result?)
    }

    async fn shutdown(&mut self) -> Result<()> {
        let result = match self.channel.take() {
            Some(mut channel) if channel.is_open() => channel.close().await,
            _ => Ok(()),
        };
        self.reply_queue = None;
        self.replies = None;
        self.pending.clear();
        self.set_state(ConnectionState::Disconnected);
        diagnostics::debug!("Broker connection closed");
        Ok(result?)
    }
}
