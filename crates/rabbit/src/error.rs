// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use envelope::EnvelopeError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RabbitError>;

/// Failure reported by a broker transport.
///
/// `Connection` failures are retried after a fresh connection is opened.
/// `Channel` failures come from the broker refusing an operation and are
/// returned to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Broker refused the operation: {0}")]
    Channel(String),
}

impl TransportError {
    pub fn is_connection(&self) -> bool {
        matches!(self, TransportError::Connection(_))
    }
}

#[derive(Debug, Error)]
pub enum RabbitError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Message to '{routing_key}' could not be routed to any queue")]
    Unroutable { routing_key: String },

    #[error("Broker refused to accept the message to '{routing_key}'")]
    Rejected { routing_key: String },

    #[error("{service} service could not be reached in time.")]
    Unreachable { service: String },

    #[error("Delivery {delivery_tag} belongs to a closed channel and can no longer be acknowledged")]
    StaleDelivery { delivery_tag: u64 },

    #[error("A reply with correlation id {0} is already awaited")]
    DuplicateCorrelation(String),

    #[error("Broker connection has been closed")]
    Closed,
}

impl RabbitError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        RabbitError::Config(message.into())
    }

    pub fn unreachable<S: Into<String>>(service: S) -> Self {
        RabbitError::Unreachable {
            service: service.into(),
        }
    }
}
