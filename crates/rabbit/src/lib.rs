// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Rabbit - broker plumbing for the data store admin tools
//!
//! Settings, a reconnecting connection task with delivery confirmation, a
//! publisher, request/response calls, and queue administration. Transports
//! plug in behind [`transport::Connector`]: RabbitMQ through lapin in
//! [`amqp`], or the in-process [`memory::MemoryBroker`].

pub mod admin;
pub mod amqp;
pub mod config;
pub mod connection;
pub mod consumer;
mod error;
pub mod memory;
pub mod publisher;
pub mod queries;
pub mod retry;
pub mod rpc;
pub mod transport;

pub use admin::{BatchReport, LoadedChunk, MessageSummary, QueueAdmin, load};
pub use amqp::AmqpConnector;
pub use config::{Settings, load_config};
pub use connection::{ConnectionHandle, ConnectionOptions, ConnectionState, Delivery};
pub use consumer::Consumer;
pub use error::{RabbitError, Result, TransportError};
pub use memory::MemoryBroker;
pub use publisher::{PublishOptions, Publisher};
pub use retry::RetryPolicy;
pub use rpc::RpcClient;
pub use transport::PublishOutcome;
