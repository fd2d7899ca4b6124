// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Transaction records returned by the monitor, and the reduction of their
//! sub-record states into one overall state.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::state::State;

/// A file that failed within a sub-record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub filepath: String,
    pub reason: String,
}

/// Failed files of a sub-record, unique by file path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailedFiles(BTreeMap<String, String>);

impl FailedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure. The first reason recorded for a path is kept.
    pub fn insert(&mut self, filepath: String, reason: String) -> bool {
        use std::collections::btree_map::Entry;
        match self.0.entry(filepath) {
            Entry::Vacant(slot) => {
                slot.insert(reason);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(path, reason)| (path.as_str(), reason.as_str()))
    }
}

impl Serialize for FailedFiles {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for (filepath, reason) in &self.0 {
            seq.serialize_element(&FailedFile {
                filepath: filepath.clone(),
                reason: reason.clone(),
            })?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for FailedFiles {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let files = Vec::<FailedFile>::deserialize(deserializer)?;
        let mut set = FailedFiles::new();
        for file in files {
            set.insert(file.filepath, file.reason);
        }
        Ok(set)
    }
}

/// One partition of a split transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub sub_id: String,
    pub state: State,
    pub last_updated: NaiveDateTime,
    #[serde(default)]
    pub failed_files: FailedFiles,
}

/// A logical transaction and all of its sub-records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub transaction_id: String,
    pub user: String,
    pub group: String,
    pub api_action: String,
    pub creation_time: NaiveDateTime,
    #[serde(default)]
    pub sub_records: Vec<SubRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_label: Option<String>,
}

/// Overall state of a transaction and the time it was last touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionStatus {
    pub state: State,
    pub last_activity: NaiveDateTime,
}

impl TransactionRecord {
    pub fn status(&self) -> Option<TransactionStatus> {
        aggregate(self)
    }
}

/// Reduce the sub-record states of a transaction to one overall state.
///
/// The earliest pipeline state among the sub-records wins. Only when every
/// sub-record has reached COMPLETE or beyond does the result become
/// COMPLETE_WITH_ERRORS (a sub-record FAILED) or COMPLETE_WITH_WARNINGS
/// (the transaction carries warnings). Returns `None` without sub-records.
pub fn aggregate(transaction: &TransactionRecord) -> Option<TransactionStatus> {
    let min_state = transaction.sub_records.iter().map(|sr| sr.state).min()?;
    let last_activity = transaction
        .sub_records
        .iter()
        .map(|sr| sr.last_updated)
        .max()?;
    let any_failed = transaction
        .sub_records
        .iter()
        .any(|sr| sr.state == State::Failed);

    let state = if min_state == State::Complete && any_failed {
        State::CompleteWithErrors
    } else if min_state == State::Complete && !transaction.warnings.is_empty() {
        State::CompleteWithWarnings
    } else {
        min_state
    };

    Some(TransactionStatus {
        state,
        last_activity,
    })
}
