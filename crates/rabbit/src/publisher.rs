// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use envelope::Envelope;

use crate::config::{ExchangeConfig, Settings};
use crate::connection::{ConnectionHandle, ConnectionOptions, Topology};
use crate::error::{RabbitError, Result};
use crate::transport::{Connector, OutgoingMessage, PublishOutcome};

/// Per-message publishing options
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Exchange name, the default exchange of the settings when `None`
    pub exchange: Option<String>,
    /// Delivery delay, honoured by the delayed-message exchange
    pub delay: Duration,
    /// Report the message as unroutable if no queue receives it. Ignored
    /// for delayed messages, whose routing the broker decides later.
    pub mandatory: bool,
    pub correlation_id: Option<String>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            exchange: None,
            delay: Duration::ZERO,
            mandatory: true,
            correlation_id: None,
        }
    }
}

impl PublishOptions {
    pub fn on_exchange(exchange: &str) -> Self {
        Self {
            exchange: Some(exchange.to_string()),
            ..Self::default()
        }
    }
}

/// ISO-8601 local time with microseconds, the format the workflow stamps
pub fn timestamp_now() -> String {
    chrono::Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

/// Publishes envelopes with delivery confirmation
#[derive(Debug, Clone)]
pub struct Publisher {
    connection: ConnectionHandle,
    exchanges: Vec<ExchangeConfig>,
}

impl Publisher {
    pub fn new(connection: ConnectionHandle, exchanges: Vec<ExchangeConfig>) -> Result<Self> {
        if exchanges.is_empty() {
            return Err(RabbitError::config("No exchange configured to publish to"));
        }
        Ok(Self {
            connection,
            exchanges,
        })
    }

    /// Open a publishing connection that declares the configured exchanges
    pub fn connect(settings: &Settings, connector: Arc<dyn Connector>) -> Result<Self> {
        let topology = Topology {
            exchanges: settings.rabbit.exchanges.clone(),
            ..Topology::default()
        };
        let connection = ConnectionHandle::spawn(
            connector,
            topology,
            ConnectionOptions::from_settings(&settings.rabbit),
        );
        Self::new(connection, settings.rabbit.exchanges.clone())
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn default_exchange(&self) -> &ExchangeConfig {
        // non-empty, checked in new()
        &self.exchanges[0]
    }

    pub fn exchange(&self, name: &str) -> Option<&ExchangeConfig> {
        self.exchanges.iter().find(|e| e.name == name)
    }

    fn resolve_exchange(&self, name: Option<&str>) -> Result<&ExchangeConfig> {
        match name {
            None => Ok(self.default_exchange()),
            Some(name) => self
                .exchange(name)
                .ok_or_else(|| RabbitError::config(format!("Exchange {name} is not configured"))),
        }
    }

    /// Stamp the envelope and build the message for it
    pub fn prepare(
        &self,
        routing_key: &str,
        envelope: &mut Envelope,
        options: &PublishOptions,
    ) -> Result<OutgoingMessage> {
        let exchange = self.resolve_exchange(options.exchange.as_deref())?;
        envelope.timestamp = Some(timestamp_now());
        let body = envelope::encode(envelope)?;

        let mut message = OutgoingMessage::new(&exchange.name, routing_key, body);
        message.delay = options.delay;
        message.mandatory = options.mandatory && options.delay.is_zero();
        message.correlation_id = options.correlation_id.clone();
        Ok(message)
    }

    /// Publish an envelope and wait for the broker to confirm it.
    ///
    /// Connection failures are retried until the broker takes the message.
    /// An unroutable message is logged and reported as
    /// [`PublishOutcome::Unroutable`], never retried.
    pub async fn publish(
        &self,
        routing_key: &str,
        envelope: &mut Envelope,
        options: PublishOptions,
    ) -> Result<PublishOutcome> {
        let message = self.prepare(routing_key, envelope, &options)?;
        let outcome = self.connection.publish(message).await?;
        if outcome == PublishOutcome::Confirmed {
            diagnostics::debug!("Published message to {routing_key}", routing_key: routing_key);
        }
        Ok(outcome)
    }

    pub async fn close(&self) -> Result<()> {
        self.connection.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use crate::retry::RetryPolicy;
    use envelope::{ApiAction, Details, Payload};

    fn exchanges() -> Vec<ExchangeConfig> {
        vec![
            ExchangeConfig {
                name: "nlds".to_string(),
                kind: "topic".to_string(),
                delayed: true,
            },
            ExchangeConfig {
                name: "audit".to_string(),
                kind: "fanout".to_string(),
                delayed: false,
            },
        ]
    }

    fn publisher(broker: &MemoryBroker) -> Publisher {
        let topology = Topology {
            exchanges: exchanges(),
            ..Topology::default()
        };
        let options = ConnectionOptions {
            retry: RetryPolicy::fast(),
            ..ConnectionOptions::default()
        };
        let connection = ConnectionHandle::spawn(Arc::new(broker.clone()), topology, options);
        Publisher::new(connection, exchanges()).expect("exchanges configured")
    }

    fn envelope() -> Envelope {
        Envelope::new(Details::new(ApiAction::Put), Payload::new())
    }

    #[tokio::test]
    async fn test_publish_stamps_timestamp() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        broker.bind_queue("route_q", "nlds", "nlds-api.route.*");
        let publisher = publisher(&broker);

        let mut envelope = envelope();
        let outcome = publisher
            .publish("nlds-api.route.start", &mut envelope, PublishOptions::default())
            .await?;
        assert_eq!(outcome, PublishOutcome::Confirmed);
        assert!(envelope.timestamp.is_some());

        let queued = broker.messages("route_q");
        assert_eq!(queued.len(), 1);
        let decoded = envelope::decode(&queued[0].body)?;
        assert_eq!(decoded.timestamp, envelope.timestamp);
        Ok(())
    }

    #[tokio::test]
    async fn test_unroutable_is_reported_not_retried() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker);
        let outcome = publisher
            .publish("nobody.listens.here", &mut envelope(), PublishOptions::default())
            .await?;
        assert_eq!(outcome, PublishOutcome::Unroutable);
        assert_eq!(broker.connect_attempts(), 1);
        Ok(())
    }

    #[test]
    fn test_delay_disables_mandatory() -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        let _guard = runtime.enter();
        let publisher = publisher(&MemoryBroker::new());

        let options = PublishOptions {
            delay: Duration::from_secs(10),
            ..PublishOptions::default()
        };
        let message = publisher.prepare("nlds-api.route.start", &mut envelope(), &options)?;
        assert!(!message.mandatory);
        assert_eq!(message.delay, Duration::from_secs(10));

        let message =
            publisher.prepare("x", &mut envelope(), &PublishOptions::on_exchange("audit"))?;
        assert!(message.mandatory);
        assert_eq!(message.exchange, "audit");

        let missing = publisher.prepare("x", &mut envelope(), &PublishOptions::on_exchange("nope"));
        assert!(matches!(missing, Err(RabbitError::Config(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_publish_survives_connection_loss() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        broker.bind_queue("route_q", "nlds", "#");
        let publisher = publisher(&broker);
        publisher.connection().connect().await?;

        broker.drop_connections();
        broker.fail_next_connects(2);
        let outcome = publisher
            .publish("nlds-api.route.start", &mut envelope(), PublishOptions::default())
            .await?;
        assert_eq!(outcome, PublishOutcome::Confirmed);
        assert_eq!(broker.queue_len("route_q"), 1);
        assert_eq!(broker.connect_attempts(), 4);
        Ok(())
    }
}
