// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub mod query;
pub mod queue;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rabbit::config::default_config_path;
use rabbit::{AmqpConnector, Consumer, QueueAdmin, RpcClient, Settings, load_config};

/// Load the settings file, `path` or the default location
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let path = path.map_or_else(default_config_path, Path::to_path_buf);
    diagnostics::debug!("Loading settings from {path}", path: path.display().to_string());
    load_config(&path).with_context(|| format!("Could not load settings from {}", path.display()))
}

/// An RPC client on the configured broker. The connection opens on first use.
pub fn rpc_client(settings: &Settings, timeout: Option<u64>) -> Result<RpcClient> {
    let connector = Arc::new(AmqpConnector::new(&settings.rabbit)?);
    let rpc = RpcClient::connect(settings, connector)?;
    Ok(match timeout {
        Some(seconds) => rpc.with_timeout(Duration::from_secs(seconds)),
        None => rpc,
    })
}

/// Queue administration on one configured queue
pub fn queue_admin(settings: &Settings, queue: &str) -> Result<QueueAdmin> {
    let connector = Arc::new(AmqpConnector::new(&settings.rabbit)?);
    let consumer = Consumer::connect(settings, connector, queue)?;
    Ok(QueueAdmin::new(consumer))
}
