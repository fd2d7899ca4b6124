// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cmd::commands::query::{StatArgs, stat_command};
use cmd::commands::{load_settings, rpc_client};
use envelope::{Envelope, keys};
use rabbit::config::parse_config;
use rabbit::{ConnectionOptions, MemoryBroker, RetryPolicy, RpcClient};
use serde_json::{Value, json};

const SETTINGS: &str = r#"{
    "rabbitMQ": {
        "user": "admin", "password": "secret", "server": "rabbit.example.org",
        "admin_port": 15672, "vhost": "nlds_test",
        "exchange": [{"name": "nlds", "type": "topic", "delayed": false}],
        "rpc_timeout": 2
    }
}"#;

#[tokio::test]
async fn test_load_settings_from_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(".nlds-admin-config");
    std::fs::write(&path, SETTINGS)?;

    let settings = load_settings(Some(path.as_path()))?;
    assert_eq!(settings.rabbit.server, "rabbit.example.org");

    // building a client does not touch the network
    let rpc = rpc_client(&settings, Some(5))?;
    assert_eq!(rpc.timeout(), Duration::from_secs(5));
    let rpc = rpc_client(&settings, None)?;
    assert_eq!(rpc.timeout(), Duration::from_secs(2));
    Ok(())
}

#[test]
fn test_missing_settings_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load_settings(Some(dir.path().join("absent").as_path())).expect_err("no file");
    assert!(err.to_string().starts_with("Could not load settings from"));
}

fn client(broker: &MemoryBroker) -> RpcClient {
    let settings = parse_config(SETTINGS, Path::new("admin_cli_tests")).expect("settings");
    let options = ConnectionOptions {
        retry: RetryPolicy::fast(),
        ..ConnectionOptions::default()
    };
    RpcClient::connect_with(&settings, Arc::new(broker.clone()), options).expect("client")
}

fn record(id: i64, transaction_id: &str, state: &str) -> Value {
    json!({
        "id": id, "transaction_id": transaction_id, "user": "alice", "group": "gws",
        "api_action": "putlist", "creation_time": "2024-03-01T09:00:00",
        "sub_records": [{
            "id": id, "sub_id": "007075b2-8c79-4cfa-a1e5-0aaa65892454",
            "state": state, "last_updated": "2024-03-01T09:30:00", "failed_files": []
        }]
    })
}

#[tokio::test]
async fn test_stat_shows_catalog_labels() -> anyhow::Result<()> {
    let broker = MemoryBroker::new();
    broker.declare_exchange("nlds", "topic");
    broker.bind_queue(keys::CATALOG_Q, "nlds", keys::CATALOG_Q);
    broker.bind_queue(keys::MONITOR_Q, "nlds", keys::MONITOR_Q);
    let rpc = client(&broker);

    let services = broker.clone();
    let served = tokio::spawn(async move {
        // monitor: the records, without holding labels
        let request = services.next_request(keys::MONITOR_Q).await;
        let mut response = envelope::decode(&request.body).expect("stat request");
        response.set_payload(
            match json!({"records": [
                record(7, "a06ec7b3-e83c-4ac7-97d8-2545a0b8d317", "COMPLETE"),
                record(8, "b16ec7b3-e83c-4ac7-97d8-2545a0b8d318", "TRANSFER_PUTTING")
            ]}) {
                Value::Object(map) => map,
                _ => envelope::Payload::new(),
            },
            false,
        )?;
        services.respond(&request, envelope::encode(&response)?);

        // catalog: the same records, labelled
        let request = services.next_request(keys::CATALOG_Q).await;
        let mut forwarded: Envelope = envelope::decode(&request.body)?;
        if let Some(Value::Array(records)) = forwarded.payload_mut()?.get_mut(keys::RECORD_LIST) {
            for record in records.iter_mut() {
                record["label"] = json!("cmip6-run");
            }
        }
        services.respond(&request, envelope::encode(&forwarded)?);
        anyhow::Ok(())
    });

    let out = stat_command(&rpc, &StatArgs::default()).await?;
    served.await??;

    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], "State of transactions for All users, order: descending");
    assert_eq!(lines.len(), 4);
    assert!(lines[2].contains("cmip6-run"));
    assert!(lines[2].contains("COMPLETE"));
    assert!(lines[3].contains("TRANSFER_PUTTING"));
    assert!(lines[3].contains("2024-03-01 09:30:00"));
    rpc.close().await?;
    Ok(())
}
