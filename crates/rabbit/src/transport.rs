// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The seam between the connection actor and a concrete broker client.
//!
//! [`crate::amqp`] talks to RabbitMQ, [`crate::memory`] is an in-process
//! loopback broker. A [`Channel`] is owned by exactly one task and is never
//! shared, so its methods take `&mut self`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::{ExchangeConfig, QueueConfig};
use crate::error::TransportError;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Name of the broker's default exchange, which routes by queue name
pub const DEFAULT_EXCHANGE: &str = "";

/// Header carrying the delivery delay for the delayed-message exchange
pub const DELAY_HEADER: &str = "x-delay";

pub const CONTENT_ENCODING: &str = "application/json";

/// A message about to be published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    /// Ask the broker to report the message if no queue receives it
    pub mandatory: bool,
    pub delay: Duration,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl OutgoingMessage {
    pub fn new(exchange: &str, routing_key: &str, body: Vec<u8>) -> Self {
        Self {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body,
            mandatory: true,
            delay: Duration::ZERO,
            correlation_id: None,
            reply_to: None,
        }
    }
}

/// A message received from a queue, either fetched or pushed to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub body: Vec<u8>,
}

/// Broker verdict on a confirmed publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Confirmed,
    /// Mandatory message matched no queue and was returned
    Unroutable,
    /// Broker refused to take responsibility for the message
    Rejected,
}

/// Opens channels on a broker
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> TransportResult<Box<dyn Channel>>;
}

/// One open channel on one broker connection
#[async_trait]
pub trait Channel: Send {
    fn is_open(&self) -> bool;

    async fn set_prefetch(&mut self, count: u16) -> TransportResult<()>;

    async fn enable_confirms(&mut self) -> TransportResult<()>;

    async fn declare_exchange(&mut self, exchange: &ExchangeConfig) -> TransportResult<()>;

    /// Declare a durable queue and its bindings
    async fn declare_queue(&mut self, queue: &QueueConfig) -> TransportResult<()>;

    /// Declare a server-named exclusive queue and start consuming from it
    async fn declare_reply_queue(
        &mut self,
    ) -> TransportResult<(String, mpsc::UnboundedReceiver<IncomingMessage>)>;

    /// Publish and wait for the broker's confirmation
    async fn publish(&mut self, message: &OutgoingMessage) -> TransportResult<PublishOutcome>;

    /// Fetch a single message, unacknowledged. `None` when the queue is empty.
    async fn get(&mut self, queue: &str) -> TransportResult<Option<IncomingMessage>>;

    async fn ack(&mut self, delivery_tag: u64) -> TransportResult<()>;

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> TransportResult<()>;

    async fn close(&mut self) -> TransportResult<()>;
}
