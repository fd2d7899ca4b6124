// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Queue administration: split, list, dump and load in-flight work items.
//!
//! Every message taken off the queue is either acked after its replacement
//! is safely published or written, or nacked back onto the queue. A message
//! is never acked on a failure path.

use std::path::{Component, Path, PathBuf};

use envelope::{Envelope, EnvelopeError, keys, split_envelope};

use crate::connection::Delivery;
use crate::consumer::Consumer;
use crate::error::Result;
use crate::publisher::PublishOptions;
use crate::transport::PublishOutcome;

/// What `list` shows for one queued message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub user: Option<String>,
    pub group: Option<String>,
    pub transaction_id: Option<String>,
    pub sub_id: Option<String>,
    pub routing_key: String,
    pub file_count: Option<usize>,
    /// Why the message could not be read, if it could not
    pub error: Option<String>,
}

impl MessageSummary {
    fn of(delivery: &Delivery) -> Self {
        let mut summary = MessageSummary {
            user: None,
            group: None,
            transaction_id: None,
            sub_id: None,
            routing_key: delivery.routing_key.clone(),
            file_count: None,
            error: None,
        };
        match envelope::codec::decode_raw(&delivery.body) {
            Ok(message) => {
                let details = &message.details;
                summary.user = details.user.clone();
                summary.group = details.group.clone();
                summary.transaction_id = details.transaction_id.clone();
                summary.sub_id = details.sub_id.clone();
                match message.file_count() {
                    Ok(count) => summary.file_count = Some(count),
                    Err(err) => summary.error = Some(err.to_string()),
                }
            }
            Err(err) => summary.error = Some(err.to_string()),
        }
        summary
    }
}

/// One message that was split or dumped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedMessage {
    pub user: Option<String>,
    pub group: Option<String>,
    pub transaction_id: Option<String>,
    pub original_sub_id: String,
    /// Sub ids of the replacement chunks, the first equal to the original
    pub chunk_sub_ids: Vec<String>,
    /// Files written by `dump`, one per chunk
    pub files: Vec<PathBuf>,
}

/// A message returned to its queue unprocessed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequeuedMessage {
    pub routing_key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: Vec<ProcessedMessage>,
    pub requeued: Vec<RequeuedMessage>,
}

impl BatchReport {
    pub fn chunk_count(&self) -> usize {
        self.processed.iter().map(|m| m.chunk_sub_ids.len()).sum()
    }
}

/// A chunk file read back by [`load`]
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedChunk {
    pub path: PathBuf,
    pub envelope: Envelope,
}

#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Republish,
    Directory(&'a Path),
}

enum Outcome {
    Done(ProcessedMessage),
    /// Leave the message on the queue
    Hold(String),
}

/// Message administration on one queue
#[derive(Debug, Clone)]
pub struct QueueAdmin {
    consumer: Consumer,
}

impl QueueAdmin {
    pub fn new(consumer: Consumer) -> Self {
        Self { consumer }
    }

    pub fn queue(&self) -> &str {
        self.consumer.queue()
    }

    /// Split up to `n` messages into messages of at most `chunk_size` files,
    /// republished to the routing key each message arrived with
    pub async fn split(&self, n: usize, chunk_size: usize, compress: bool) -> Result<BatchReport> {
        self.process(n, chunk_size, compress, Target::Republish).await
    }

    /// Split up to `n` messages into chunk files under
    /// `target_dir/<queue>/<transaction_id>/<sub_id>`
    pub async fn dump(
        &self,
        n: usize,
        target_dir: &Path,
        chunk_size: usize,
        compress: bool,
    ) -> Result<BatchReport> {
        self.process(n, chunk_size, compress, Target::Directory(target_dir))
            .await
    }

    /// Inspect up to `n` messages without consuming any of them.
    ///
    /// Deliveries are held until the batch is complete so each message is
    /// seen once, then all of them are returned to the queue.
    pub async fn list(&self, n: usize) -> Result<Vec<MessageSummary>> {
        let mut held = Vec::new();
        let mut summaries = Vec::new();
        let result = self.inspect(n, &mut held, &mut summaries).await;
        self.release(held).await;
        result.map(|()| summaries)
    }

    async fn inspect(
        &self,
        n: usize,
        held: &mut Vec<Delivery>,
        summaries: &mut Vec<MessageSummary>,
    ) -> Result<()> {
        for _ in 0..n {
            let Some(delivery) = self.consumer.next().await? else {
                self.log_empty();
                break;
            };
            summaries.push(MessageSummary::of(&delivery));
            held.push(delivery);
        }
        Ok(())
    }

    async fn process(
        &self,
        n: usize,
        chunk_size: usize,
        compress: bool,
        target: Target<'_>,
    ) -> Result<BatchReport> {
        if chunk_size == 0 {
            return Err(EnvelopeError::validation(
                "chunk_size",
                "must be at least one file per message",
            )
            .into());
        }
        let mut report = BatchReport::default();
        let mut held = Vec::new();
        let result = self
            .process_batch(n, chunk_size, compress, target, &mut report, &mut held)
            .await;
        self.release(held).await;
        result.map(|()| report)
    }

    async fn process_batch(
        &self,
        n: usize,
        chunk_size: usize,
        compress: bool,
        target: Target<'_>,
        report: &mut BatchReport,
        held: &mut Vec<Delivery>,
    ) -> Result<()> {
        for _ in 0..n {
            let Some(delivery) = self.consumer.next().await? else {
                self.log_empty();
                break;
            };
            match self.process_one(&delivery, chunk_size, compress, target).await {
                Ok(Outcome::Done(processed)) => {
                    self.consumer.ack(&delivery).await?;
                    let chunks = processed.chunk_sub_ids.len();
                    let sub_id = processed.original_sub_id.as_str();
                    diagnostics::info!("Replaced message {sub_id} with {chunks} chunks", sub_id: sub_id, chunks: chunks);
                    report.processed.push(processed);
                }
                Ok(Outcome::Hold(reason)) => {
                    let routing_key = delivery.routing_key.clone();
                    diagnostics::warn!("Returning message on {routing_key} to the queue: {reason}", routing_key: routing_key, reason: reason);
                    report.requeued.push(RequeuedMessage {
                        routing_key,
                        reason,
                    });
                    held.push(delivery);
                }
                Err(err) => {
                    held.push(delivery);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn process_one(
        &self,
        delivery: &Delivery,
        chunk_size: usize,
        compress: bool,
        target: Target<'_>,
    ) -> Result<Outcome> {
        let message = match envelope::decode(&delivery.body) {
            Ok(message) => message,
            Err(err) => return Ok(Outcome::Hold(err.to_string())),
        };
        let chunks = match split_envelope(&message, chunk_size, compress) {
            Ok(chunks) => chunks,
            Err(err) => return Ok(Outcome::Hold(err.to_string())),
        };

        let details = &message.details;
        let mut processed = ProcessedMessage {
            user: details.user.clone(),
            group: details.group.clone(),
            transaction_id: details.transaction_id.clone(),
            // split_envelope fails without a sub_id
            original_sub_id: details.sub_id.clone().unwrap_or_default(),
            chunk_sub_ids: chunks
                .iter()
                .filter_map(|c| c.details.sub_id.clone())
                .collect(),
            files: Vec::new(),
        };

        match target {
            Target::Republish => {
                // chunks go back out on the key the work item arrived with
                let routing_key = match keys::split_routing_key(&delivery.routing_key) {
                    Ok(routing_key) => routing_key,
                    Err(err) => return Ok(Outcome::Hold(err.to_string())),
                };
                let action = routing_key.action;
                let chunk_count = chunks.len();
                diagnostics::debug!("Republishing {action} work item as {chunk_count} chunks", action: action, chunk_count: chunk_count);
                if let Some(reason) = self.republish(delivery, chunks).await? {
                    return Ok(Outcome::Hold(reason));
                }
            }
            Target::Directory(root) => {
                let Some(transaction_id) = details.transaction_id.as_deref() else {
                    return Ok(Outcome::Hold(
                        EnvelopeError::MissingField(keys::TRANSACT_ID).to_string(),
                    ));
                };
                let dir = match chunk_dir(root, self.queue(), transaction_id) {
                    Ok(dir) => dir,
                    Err(err) => return Ok(Outcome::Hold(err.to_string())),
                };
                processed.files = write_chunks(&dir, &delivery.routing_key, chunks).await?;
            }
        }
        Ok(Outcome::Done(processed))
    }

    /// Publish every chunk. Returns why the original must stay queued if a
    /// chunk was not accepted; chunks already published are not withdrawn.
    async fn republish(&self, delivery: &Delivery, chunks: Vec<Envelope>) -> Result<Option<String>> {
        let publisher = self.consumer.publisher();
        // back through the exchange the message came from, if it is one we know
        let exchange = publisher
            .exchange(&delivery.exchange)
            .unwrap_or_else(|| publisher.default_exchange())
            .name
            .clone();
        for mut chunk in chunks {
            let options = PublishOptions::on_exchange(&exchange);
            match publisher.publish(&delivery.routing_key, &mut chunk, options).await {
                Ok(PublishOutcome::Confirmed) => {}
                Ok(outcome) => {
                    return Ok(Some(format!(
                        "chunk {} was not accepted by the broker: {outcome:?}",
                        chunk.details.sub_id.unwrap_or_default()
                    )));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Return held deliveries to the queue
    async fn release(&self, held: Vec<Delivery>) {
        for delivery in held {
            if let Err(err) = self.consumer.nack(&delivery, true).await {
                // a lost channel has already returned the message
                let tag = delivery.tag.value();
                let err = err.to_string();
                diagnostics::warn!("Could not requeue delivery {tag}: {err}", tag: tag, err: err.as_str());
            }
        }
    }

    fn log_empty(&self) {
        let queue = self.queue();
        diagnostics::info!("Queue {queue} has no more messages", queue: queue);
    }

    pub async fn close(&self) -> Result<()> {
        self.consumer.close().await
    }
}

/// A single, plain path component taken from a message
fn path_component(field: &'static str, value: &str) -> std::result::Result<(), EnvelopeError> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(EnvelopeError::validation(
            field,
            format!("'{value}' cannot be used as a file name"),
        )),
    }
}

/// `root/queue/transaction_id`
pub fn chunk_dir(root: &Path, queue: &str, transaction_id: &str) -> Result<PathBuf> {
    path_component("queue", queue)?;
    path_component(keys::TRANSACT_ID, transaction_id)?;
    Ok(root.join(queue).join(transaction_id))
}

async fn write_chunks(dir: &Path, routing_key: &str, chunks: Vec<Envelope>) -> Result<Vec<PathBuf>> {
    // validate every name before writing anything
    let mut named = Vec::with_capacity(chunks.len());
    for mut chunk in chunks {
        let sub_id = chunk
            .details
            .sub_id
            .clone()
            .ok_or(EnvelopeError::MissingField(keys::SUB_ID))?;
        path_component(keys::SUB_ID, &sub_id)?;
        chunk.details.routing_key = Some(routing_key.to_string());
        named.push((dir.join(&sub_id), chunk));
    }

    tokio::fs::create_dir_all(dir).await?;
    let mut written = Vec::with_capacity(named.len());
    for (path, chunk) in named {
        tokio::fs::write(&path, envelope::encode(&chunk)?).await?;
        let file = path.display().to_string();
        diagnostics::debug!("Wrote chunk {file}", file: file);
        written.push(path);
    }
    Ok(written)
}

/// Read back the chunk files `dump` wrote for one transaction, sorted by
/// file name and decoded
pub async fn load(target_dir: &Path, queue: &str, transaction_id: &str) -> Result<Vec<LoadedChunk>> {
    let dir = chunk_dir(target_dir, queue, transaction_id)?;
    let mut entries = tokio::fs::read_dir(&dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();

    let mut chunks = Vec::with_capacity(paths.len());
    for path in paths {
        let body = tokio::fs::read(&path).await?;
        let envelope = envelope::decode(&body)?;
        chunks.push(LoadedChunk { path, envelope });
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_dir_rejects_path_tricks() {
        let root = Path::new("/tmp/dump");
        assert_eq!(
            chunk_dir(root, "nlds_q", "5c3f1e8a").ok(),
            Some(PathBuf::from("/tmp/dump/nlds_q/5c3f1e8a"))
        );
        assert!(chunk_dir(root, "nlds_q", "../etc").is_err());
        assert!(chunk_dir(root, "nlds_q", "a/b").is_err());
        assert!(chunk_dir(root, "..", "5c3f1e8a").is_err());
        assert!(chunk_dir(root, "nlds_q", "").is_err());
    }
}
