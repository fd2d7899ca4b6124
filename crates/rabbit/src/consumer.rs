// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use crate::config::Settings;
use crate::connection::{ConnectionHandle, ConnectionOptions, Delivery, Topology};
use crate::error::Result;
use crate::publisher::Publisher;
use crate::transport::Connector;

/// Pulls messages one at a time from a configured queue.
///
/// The consumer republishes on its own connection, so a message and the
/// messages derived from it go through the same channel.
#[derive(Debug, Clone)]
pub struct Consumer {
    queue: String,
    connection: ConnectionHandle,
    publisher: Publisher,
}

impl Consumer {
    /// Connect to consume from `queue`, which must be listed in the settings
    pub fn connect(settings: &Settings, connector: Arc<dyn Connector>, queue: &str) -> Result<Self> {
        let options = ConnectionOptions::from_settings(&settings.rabbit);
        Self::connect_with(settings, connector, queue, options)
    }

    pub fn connect_with(
        settings: &Settings,
        connector: Arc<dyn Connector>,
        queue: &str,
        options: ConnectionOptions,
    ) -> Result<Self> {
        let queue_config = settings.rabbit.queue(queue)?.clone();
        let topology = Topology {
            exchanges: settings.rabbit.exchanges.clone(),
            queues: vec![queue_config],
            reply_queue: false,
        };
        let connection = ConnectionHandle::spawn(connector, topology, options);
        let publisher = Publisher::new(connection.clone(), settings.rabbit.exchanges.clone())?;
        Ok(Self {
            queue: queue.to_string(),
            connection,
            publisher,
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Take the next message, `None` once the queue is empty
    pub async fn next(&self) -> Result<Option<Delivery>> {
        let delivery = self.connection.get(&self.queue).await?;
        if let Some(delivery) = &delivery {
            let tag = delivery.tag.value();
            let routing_key = delivery.routing_key.as_str();
            diagnostics::debug!("Received delivery {tag} with routing key {routing_key}", tag: tag, routing_key: routing_key);
        }
        Ok(delivery)
    }

    pub async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.connection.ack(delivery.tag).await
    }

    /// Reject a delivery, returning it to the queue when `requeue` is set
    pub async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        self.connection.nack(delivery.tag, requeue).await
    }

    pub async fn close(&self) -> Result<()> {
        self.connection.close().await
    }
}
