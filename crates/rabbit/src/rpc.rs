// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Request/response calls over the broker.
//!
//! Every client has one reply queue, opened with its connection. Each call
//! gets a fresh correlation id, and the connection task hands the matching
//! reply back to the waiting caller.

use std::sync::Arc;
use std::time::Duration;

use envelope::Envelope;
use uuid::Uuid;

use crate::config::Settings;
use crate::connection::{ConnectionHandle, ConnectionOptions, Topology};
use crate::error::{RabbitError, Result};
use crate::publisher::{PublishOptions, Publisher};
use crate::transport::{Connector, PublishOutcome};

#[derive(Debug, Clone)]
pub struct RpcClient {
    publisher: Publisher,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(publisher: Publisher, timeout: Duration) -> Self {
        Self { publisher, timeout }
    }

    /// Open a connection with a reply queue, calls time out after the
    /// configured `rpc_timeout`
    pub fn connect(settings: &Settings, connector: Arc<dyn Connector>) -> Result<Self> {
        let options = ConnectionOptions::from_settings(&settings.rabbit);
        Self::connect_with(settings, connector, options)
    }

    pub fn connect_with(
        settings: &Settings,
        connector: Arc<dyn Connector>,
        options: ConnectionOptions,
    ) -> Result<Self> {
        let topology = Topology {
            exchanges: settings.rabbit.exchanges.clone(),
            queues: Vec::new(),
            reply_queue: true,
        };
        let connection = ConnectionHandle::spawn(connector, topology, options);
        let publisher = Publisher::new(connection, settings.rabbit.exchanges.clone())?;
        Ok(Self::new(publisher, settings.rabbit.rpc_timeout))
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Call with the client's timeout, see [`RpcClient::call_with_timeout`]
    pub async fn call(&self, routing_key: &str, envelope: &mut Envelope) -> Result<Option<Vec<u8>>> {
        self.call_with_timeout(routing_key, envelope, self.timeout)
            .await
    }

    /// Publish `envelope` to `routing_key` and wait for the reply body.
    ///
    /// Returns `Ok(None)` when no reply arrives within `timeout`: the service
    /// could not be reached. A request no queue accepted fails with
    /// [`RabbitError::Unroutable`] straight away.
    pub async fn call_with_timeout(
        &self,
        routing_key: &str,
        envelope: &mut Envelope,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        let correlation_id = Uuid::new_v4().to_string();
        let message = self
            .publisher
            .prepare(routing_key, envelope, &PublishOptions::default())?;

        let connection = self.publisher.connection();
        let (outcome, reply) = connection.request(message, correlation_id.clone()).await?;
        match outcome {
            PublishOutcome::Confirmed => {}
            PublishOutcome::Unroutable => {
                return Err(RabbitError::Unroutable {
                    routing_key: routing_key.to_string(),
                });
            }
            PublishOutcome::Rejected => {
                return Err(RabbitError::Rejected {
                    routing_key: routing_key.to_string(),
                });
            }
        }
        diagnostics::debug!("Awaiting reply {correlation_id} from {routing_key}", correlation_id: correlation_id, routing_key: routing_key);

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(body)) => Ok(Some(body)),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                connection.forget_reply(&correlation_id).await;
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                diagnostics::warn!("No reply from {routing_key} within {timeout_ms} ms", routing_key: routing_key, timeout_ms: timeout_ms);
                Ok(None)
            }
        }
    }

    /// [`RpcClient::call`] and decode the reply
    pub async fn call_envelope(
        &self,
        routing_key: &str,
        envelope: &mut Envelope,
    ) -> Result<Option<Envelope>> {
        match self.call(routing_key, envelope).await? {
            Some(body) => Ok(Some(envelope::decode(&body)?)),
            None => Ok(None),
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.publisher.close().await
    }
}
