// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Settings file loading and validation.
//!
//! The settings file is the JSON document shared with the rest of the data
//! store deployment. Only its `rabbitMQ` section is read here. JSON is valid
//! YAML, so the file is parsed with serde_yaml_ng like every other config in
//! this workspace.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{RabbitError, Result};

/// Environment variable overriding the default settings path
pub const CONFIG_ENV_VAR: &str = "NLDS_ADMIN_CONFIG";

/// File name of the settings file in the user's home directory
pub const CONFIG_FILE_NAME: &str = ".nlds-admin-config";

const RABBIT_SECTION: &str = "rabbitMQ";
const DEFAULT_PORT: u16 = 5672;
const DEFAULT_HEARTBEAT_SECS: u64 = 300;
const DEFAULT_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

/// A validated exchange declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub name: String,
    /// Broker exchange type: `topic`, `direct`, `fanout` or `headers`
    pub kind: String,
    /// Declared through the delayed-message plugin
    pub delayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Binding {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

/// The validated `rabbitMQ` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RabbitSettings {
    pub user: String,
    pub password: String,
    pub server: String,
    pub port: u16,
    pub admin_port: u16,
    pub vhost: String,
    /// Declared exchanges. The first one is the default for publishing.
    pub exchanges: Vec<ExchangeConfig>,
    pub queues: Vec<QueueConfig>,
    pub heartbeat: Duration,
    /// How long a blocked broker may hold a publish before the connection
    /// is treated as lost
    pub timeout: Duration,
    pub rpc_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub rabbit: RabbitSettings,
}

impl RabbitSettings {
    pub fn default_exchange(&self) -> &ExchangeConfig {
        // validate_config guarantees at least one exchange
        &self.exchanges[0]
    }

    pub fn exchange(&self, name: &str) -> Option<&ExchangeConfig> {
        self.exchanges.iter().find(|e| e.name == name)
    }

    /// Look up a queue to consume from
    pub fn queue(&self, name: &str) -> Result<&QueueConfig> {
        if self.queues.is_empty() {
            return Err(RabbitError::config("No rabbit queues found in config."));
        }
        self.queues.iter().find(|q| q.name == name).ok_or_else(|| {
            RabbitError::config(format!("Requested queue {name} not in configuration."))
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(rename = "rabbitMQ")]
    rabbit: Option<RawRabbit>,
}

#[derive(Debug, Deserialize)]
struct RawRabbit {
    user: Option<String>,
    password: Option<String>,
    server: Option<String>,
    admin_port: Option<u16>,
    vhost: Option<String>,
    port: Option<u16>,
    exchange: Option<OneOrMany<RawExchange>>,
    #[serde(default)]
    queues: Vec<QueueConfig>,
    timeout: Option<u64>,
    heartbeat: Option<u64>,
    rpc_timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawExchange {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    delayed: Option<bool>,
}

/// `$NLDS_ADMIN_CONFIG`, else `~/.nlds-admin-config`
pub fn default_config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        return PathBuf::from(path);
    }
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    home.join(CONFIG_FILE_NAME)
}

/// Load and validate the settings file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| RabbitError::ConfigFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content, path)
}

/// Parse settings text. `origin` is only used in error messages.
pub fn parse_config(content: &str, origin: &Path) -> Result<Settings> {
    let raw: RawSettings =
        serde_yaml_ng::from_str(content).map_err(|source| RabbitError::ConfigParse {
            path: origin.to_path_buf(),
            source,
        })?;
    validate_config(raw, origin)
}

fn validate_config(raw: RawSettings, origin: &Path) -> Result<Settings> {
    let origin = origin.display();
    let rabbit = raw.rabbit.ok_or_else(|| {
        RabbitError::config(format!(
            "The config file at {origin} does not contain a ['{RABBIT_SECTION}'] section."
        ))
    })?;

    let missing = |key: &str| {
        RabbitError::config(format!(
            "The config file at {origin} does not contain '{key}' in the ['{RABBIT_SECTION}'] section."
        ))
    };

    let user = rabbit.user.ok_or_else(|| missing("user"))?;
    let password = rabbit.password.ok_or_else(|| missing("password"))?;
    let server = rabbit.server.ok_or_else(|| missing("server"))?;
    let admin_port = rabbit.admin_port.ok_or_else(|| missing("admin_port"))?;
    let vhost = rabbit.vhost.ok_or_else(|| missing("vhost"))?;
    let raw_exchanges = rabbit.exchange.ok_or_else(|| missing("exchange"))?.into_vec();

    if raw_exchanges.is_empty() {
        return Err(RabbitError::config(format!(
            "The config file at {origin} declares no exchanges."
        )));
    }
    let exchanges = raw_exchanges
        .into_iter()
        .map(validate_exchange)
        .collect::<Result<Vec<_>>>()?;

    for queue in &rabbit.queues {
        if queue.name.is_empty() {
            return Err(RabbitError::config("Queue name cannot be empty"));
        }
        for binding in &queue.bindings {
            if !exchanges.iter().any(|e| e.name == binding.exchange) {
                return Err(RabbitError::config(format!(
                    "Queue {} is bound to undeclared exchange {}",
                    queue.name, binding.exchange
                )));
            }
        }
    }

    Ok(Settings {
        rabbit: RabbitSettings {
            user,
            password,
            server,
            port: rabbit.port.unwrap_or(DEFAULT_PORT),
            admin_port,
            vhost,
            exchanges,
            queues: rabbit.queues,
            heartbeat: Duration::from_secs(rabbit.heartbeat.unwrap_or(DEFAULT_HEARTBEAT_SECS)),
            timeout: Duration::from_secs(rabbit.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            rpc_timeout: Duration::from_secs(
                rabbit.rpc_timeout.unwrap_or(DEFAULT_RPC_TIMEOUT_SECS),
            ),
        },
    })
}

fn validate_exchange(raw: RawExchange) -> Result<ExchangeConfig> {
    let incomplete = |key: &str| {
        RabbitError::config(format!(
            "Exchange in config file incomplete, cannot be declared: missing '{key}'"
        ))
    };
    let name = raw.name.ok_or_else(|| incomplete("name"))?;
    let kind = raw.kind.ok_or_else(|| incomplete("type"))?;
    let delayed = raw.delayed.ok_or_else(|| incomplete("delayed"))?;
    Ok(ExchangeConfig {
        name,
        kind,
        delayed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SETTINGS: &str = r#"{
        "authentication": {"authenticator_backend": "jasmin_authenticator"},
        "rabbitMQ": {
            "user": "full_access",
            "password": "secret",
            "server": "rabbit.example.org",
            "admin_port": 15672,
            "vhost": "nlds_staging",
            "exchange": {"name": "nlds", "type": "topic", "delayed": true},
            "queues": [
                {"name": "nlds_q",
                 "bindings": [{"exchange": "nlds", "routing_key": "nlds-api.route.*"}]}
            ]
        }
    }"#;

    fn parse(text: &str) -> Result<Settings> {
        parse_config(text, Path::new("test-config"))
    }

    #[test]
    fn test_parse_json_settings() -> anyhow::Result<()> {
        let settings = parse(SETTINGS)?;
        let rabbit = &settings.rabbit;
        assert_eq!(rabbit.server, "rabbit.example.org");
        assert_eq!(rabbit.port, 5672);
        assert_eq!(rabbit.heartbeat, Duration::from_secs(300));
        assert_eq!(rabbit.timeout, Duration::from_secs(1800));
        assert_eq!(rabbit.rpc_timeout, Duration::from_secs(30));
        assert_eq!(rabbit.default_exchange().name, "nlds");
        assert!(rabbit.default_exchange().delayed);
        assert_eq!(rabbit.queue("nlds_q")?.bindings.len(), 1);
        Ok(())
    }

    #[test]
    fn test_exchange_list_and_overrides() -> anyhow::Result<()> {
        let text = r#"
rabbitMQ:
  user: u
  password: p
  server: localhost
  admin_port: 15672
  vhost: /
  port: 5673
  heartbeat: 60
  rpc_timeout: 5
  exchange:
    - {name: nlds, type: topic, delayed: false}
    - {name: audit, type: fanout, delayed: false}
"#;
        let settings = parse(text)?;
        assert_eq!(settings.rabbit.port, 5673);
        assert_eq!(settings.rabbit.heartbeat, Duration::from_secs(60));
        assert_eq!(settings.rabbit.rpc_timeout, Duration::from_secs(5));
        assert_eq!(settings.rabbit.exchanges.len(), 2);
        assert_eq!(settings.rabbit.exchange("audit").map(|e| e.kind.as_str()), Some("fanout"));
        Ok(())
    }

    #[test]
    fn test_missing_required_key() {
        let text = SETTINGS.replace("\"admin_port\": 15672,", "");
        let err = parse(&text).expect_err("admin_port is required");
        assert!(err.to_string().contains("admin_port"));

        let err = parse("{\"other\": {}}").expect_err("section is required");
        assert!(err.to_string().contains("rabbitMQ"));
    }

    #[test]
    fn test_incomplete_exchange() {
        let text = SETTINGS.replace(", \"delayed\": true", "");
        let err = parse(&text).expect_err("delayed is required");
        assert!(matches!(err, RabbitError::Config(_)));
        assert!(err.to_string().contains("delayed"));
    }

    #[test]
    fn test_unknown_queue() -> anyhow::Result<()> {
        let settings = parse(SETTINGS)?;
        let err = settings.rabbit.queue("missing_q").expect_err("not configured");
        assert!(err.to_string().contains("missing_q"));
        Ok(())
    }

    #[test]
    fn test_binding_to_undeclared_exchange() {
        let text = SETTINGS.replace(
            "{\"exchange\": \"nlds\", \"routing_key\"",
            "{\"exchange\": \"elsewhere\", \"routing_key\"",
        );
        let err = parse(&text).expect_err("exchange not declared");
        assert!(err.to_string().contains("elsewhere"));
    }

    #[test]
    fn test_load_from_file() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(SETTINGS.as_bytes())?;
        let settings = load_config(file.path())?;
        assert_eq!(settings.rabbit.vhost, "nlds_staging");

        let err = load_config("/nonexistent/.nlds-admin-config").expect_err("no such file");
        assert!(matches!(err, RabbitError::ConfigFile { .. }));
        Ok(())
    }
}
