// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! `qm`: inspect, split, dump and reload messages waiting on a queue

use std::fmt::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use rabbit::{BatchReport, QueueAdmin};

use crate::prints;

#[derive(Subcommand, Debug, Clone)]
pub enum QmCommand {
    /// Split messages so that none carries more than <length> files
    Split(SplitArgs),
    /// List messages without consuming them
    List(QueueListArgs),
    /// Split messages into files under <target>/<queue>/<transaction_id>
    Dump(DumpArgs),
    /// Read back the files dumped for one transaction
    Load(LoadArgs),
}

impl QmCommand {
    pub fn queue(&self) -> &str {
        match self {
            QmCommand::Split(args) => &args.queue,
            QmCommand::List(args) => &args.queue,
            QmCommand::Dump(args) => &args.queue,
            QmCommand::Load(args) => &args.queue,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SplitArgs {
    /// Queue to split messages on
    #[arg(short, long)]
    pub queue: String,
    /// Number of messages to take from the queue
    #[arg(short, long, default_value_t = 1)]
    pub number: usize,
    /// Maximum number of files per message
    #[arg(short, long, default_value_t = 1000)]
    pub length: usize,
    /// Compress the data part of the new messages
    #[arg(short, long)]
    pub compress: bool,
}

#[derive(Args, Debug, Clone)]
pub struct QueueListArgs {
    /// Queue to list messages on
    #[arg(short, long)]
    pub queue: String,
    /// Number of messages to show
    #[arg(short, long, default_value_t = 1)]
    pub number: usize,
}

#[derive(Args, Debug, Clone)]
pub struct DumpArgs {
    /// Queue to dump messages from
    #[arg(short, long)]
    pub queue: String,
    /// Number of messages to take from the queue
    #[arg(short, long, default_value_t = 1)]
    pub number: usize,
    /// Directory to write to
    #[arg(short = 'r', long)]
    pub target: PathBuf,
    /// Maximum number of files per message
    #[arg(short, long, default_value_t = 1000)]
    pub length: usize,
    /// Compress the data part of the written messages
    #[arg(short, long)]
    pub compress: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Queue the messages were dumped from
    #[arg(short, long)]
    pub queue: String,
    /// Transaction id to load messages for
    #[arg(short = 't', long = "transact_id")]
    pub transaction_id: String,
    /// Directory the messages were dumped to
    #[arg(short = 'r', long)]
    pub target: PathBuf,
}

/// Describe what a split or dump did to each message
fn report(out: &mut String, batch: &BatchReport, verb: &str) -> fmt::Result {
    for message in &batch.processed {
        writeln!(
            out,
            "Working on message: {}, user: {}, group: {}",
            message.transaction_id.as_deref().unwrap_or("-"),
            message.user.as_deref().unwrap_or("-"),
            message.group.as_deref().unwrap_or("-"),
        )?;
        for sub_id in &message.chunk_sub_ids {
            writeln!(
                out,
                "    {verb} new message and changing sub id from {} to {sub_id}",
                message.original_sub_id
            )?;
        }
        for file in &message.files {
            writeln!(out, "    Wrote {}", file.display())?;
        }
        writeln!(out, "Number of sub messages: {}", message.chunk_sub_ids.len())?;
    }
    for requeued in &batch.requeued {
        writeln!(
            out,
            "Returned message with routing key {} to the queue: {}",
            requeued.routing_key, requeued.reason
        )?;
    }
    Ok(())
}

pub async fn split_command(admin: &QueueAdmin, args: &SplitArgs) -> Result<String> {
    let batch = admin
        .split(args.number, args.length, args.compress)
        .await
        .with_context(|| format!("Failed to split messages on {}", args.queue))?;
    let mut out = String::new();
    report(&mut out, &batch, "Creating")?;
    Ok(out)
}

pub async fn dump_command(admin: &QueueAdmin, args: &DumpArgs) -> Result<String> {
    let batch = admin
        .dump(args.number, &args.target, args.length, args.compress)
        .await
        .with_context(|| format!("Failed to dump messages from {}", args.queue))?;
    let mut out = String::new();
    report(&mut out, &batch, "Saving")?;
    Ok(out)
}

pub async fn list_command(admin: &QueueAdmin, args: &QueueListArgs) -> Result<String> {
    let summaries = admin
        .list(args.number)
        .await
        .with_context(|| format!("Failed to list messages on {}", args.queue))?;
    let mut out = prints::queue_table_header();
    out.push('\n');
    for summary in &summaries {
        out.push_str(&prints::queue_row(summary));
        out.push('\n');
    }
    Ok(out)
}

/// Needs no broker: the files are read and decoded
pub async fn load_command(args: &LoadArgs) -> Result<String> {
    let chunks = rabbit::load(&args.target, &args.queue, &args.transaction_id)
        .await
        .with_context(|| {
            format!(
                "Failed to load transaction {} of {} from {}",
                args.transaction_id,
                args.queue,
                args.target.display()
            )
        })?;

    let mut out = String::new();
    for chunk in &chunks {
        let details = &chunk.envelope.details;
        let files = chunk.envelope.file_count()?;
        writeln!(out, "{}", chunk.path.display())?;
        writeln!(
            out,
            "    sub_id {}, routing key {}, {files} files",
            details.sub_id.as_deref().unwrap_or("-"),
            details.routing_key.as_deref().unwrap_or("-"),
        )?;
    }
    Ok(out)
}

/// Run a subcommand that needs the queue, everything but `load`
pub async fn run(admin: &QueueAdmin, command: &QmCommand) -> Result<String> {
    match command {
        QmCommand::Split(args) => split_command(admin, args).await,
        QmCommand::List(args) => list_command(admin, args).await,
        QmCommand::Dump(args) => dump_command(admin, args).await,
        QmCommand::Load(args) => load_command(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    use envelope::{ApiAction, Details, Envelope, Payload, keys};
    use rabbit::config::parse_config;
    use rabbit::{ConnectionOptions, Consumer, MemoryBroker, RetryPolicy};
    use serde_json::{Value, json};

    const QUEUE: &str = "nlds_q";
    const ROUTING_KEY: &str = "nlds-api.transfer-put.start";
    const TRANSACTION_ID: &str = "5c3f1e8a-1111-4c61-9f5a-0d1a2b3c4d5e";
    const SUB_ID: &str = "0b0c6f6e-2222-4d9a-8a1b-4f5e6d7c8b9a";

    const SETTINGS: &str = r#"{
        "rabbitMQ": {
            "user": "admin", "password": "secret", "server": "localhost",
            "admin_port": 15672, "vhost": "nlds_test",
            "exchange": {"name": "nlds", "type": "topic", "delayed": false},
            "queues": [{"name": "nlds_q", "bindings": [
                {"exchange": "nlds", "routing_key": "*.transfer-put.start"}
            ]}]
        }
    }"#;

    fn admin(broker: &MemoryBroker) -> QueueAdmin {
        let settings = parse_config(SETTINGS, Path::new("queue_tests")).expect("settings");
        let options = ConnectionOptions {
            retry: RetryPolicy::fast(),
            ..ConnectionOptions::default()
        };
        let consumer =
            Consumer::connect_with(&settings, Arc::new(broker.clone()), QUEUE, options).expect("consumer");
        QueueAdmin::new(consumer)
    }

    fn work_item(n_files: usize) -> Vec<u8> {
        let mut details = Details::new(ApiAction::PutList);
        details.user = Some("alice".to_string());
        details.group = Some("gws".to_string());
        details.transaction_id = Some(TRANSACTION_ID.to_string());
        details.sub_id = Some(SUB_ID.to_string());
        let files: Vec<Value> = (0..n_files)
            .map(|i| json!({"original_path": format!("/gws/file_{i}.nc")}))
            .collect();
        let mut payload = Payload::new();
        payload.insert(keys::FILELIST.to_string(), Value::Array(files));
        envelope::encode(&Envelope::new(details, payload)).expect("encode")
    }

    #[tokio::test]
    async fn test_list_shows_table() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        broker.inject(QUEUE, "nlds", ROUTING_KEY, work_item(25));
        let admin = admin(&broker);

        let args = QueueListArgs {
            queue: QUEUE.to_string(),
            number: 5,
        };
        let out = run(&admin, &QmCommand::List(args)).await?;
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("user"));
        assert!(lines[1].starts_with("alice"));
        assert!(lines[1].contains(ROUTING_KEY));
        assert!(lines[1].ends_with("25"));
        assert_eq!(broker.queue_len(QUEUE), 1);
        admin.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_split_reports_sub_ids() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        broker.inject(QUEUE, "nlds", ROUTING_KEY, work_item(25));
        let admin = admin(&broker);

        let args = SplitArgs {
            queue: QUEUE.to_string(),
            number: 1,
            length: 10,
            compress: false,
        };
        let out = run(&admin, &QmCommand::Split(args)).await?;
        assert!(out.starts_with(&format!(
            "Working on message: {TRANSACTION_ID}, user: alice, group: gws\n"
        )));
        assert!(out.contains(&format!(
            "    Creating new message and changing sub id from {SUB_ID} to {SUB_ID}\n"
        )));
        assert_eq!(out.matches("Creating new message").count(), 3);
        assert!(out.ends_with("Number of sub messages: 3\n"));
        assert_eq!(broker.queue_len(QUEUE), 3);
        admin.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_dump_then_load() -> anyhow::Result<()> {
        let broker = MemoryBroker::new();
        broker.inject(QUEUE, "nlds", ROUTING_KEY, work_item(5));
        let admin = admin(&broker);
        let target = tempfile::tempdir()?;

        let args = DumpArgs {
            queue: QUEUE.to_string(),
            number: 1,
            target: target.path().to_path_buf(),
            length: 2,
            compress: true,
        };
        let out = run(&admin, &QmCommand::Dump(args)).await?;
        assert_eq!(out.matches("Saving new message").count(), 3);
        assert_eq!(out.matches("    Wrote ").count(), 3);
        assert_eq!(broker.queue_len(QUEUE), 0);
        admin.close().await?;

        let load = LoadArgs {
            queue: QUEUE.to_string(),
            transaction_id: TRANSACTION_ID.to_string(),
            target: target.path().to_path_buf(),
        };
        let out = load_command(&load).await?;
        assert_eq!(out.matches(&format!("routing key {ROUTING_KEY}")).count(), 3);
        assert_eq!(out.matches(", 2 files").count(), 2);
        assert_eq!(out.matches(", 1 files").count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_transaction() {
        let target = tempfile::tempdir().expect("tempdir");
        let load = LoadArgs {
            queue: QUEUE.to_string(),
            transaction_id: TRANSACTION_ID.to_string(),
            target: target.path().to_path_buf(),
        };
        let err = load_command(&load).await.expect_err("nothing was dumped");
        assert!(err.to_string().starts_with("Failed to load transaction"));
    }
}
