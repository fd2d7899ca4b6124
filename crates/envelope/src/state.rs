// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Workflow states, ordered by their position in the pipeline

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use serde_repr::Serialize_repr;

use crate::error::EnvelopeError;

/// State of a transaction or of one of its sub-records.
///
/// Serialized as its numeric value. Deserializes from either the number or
/// the name, since the monitor reports sub-record states by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr)]
#[repr(i32)]
pub enum State {
    Initialising = -1,
    Routing = 0,
    Splitting = 1,
    Indexing = 2,
    CatalogPutting = 3,
    TransferPutting = 4,
    CatalogGetting = 10,
    ArchiveGetting = 11,
    TransferGetting = 12,
    TransferInit = 13,
    ArchiveInit = 20,
    ArchivePutting = 21,
    ArchivePreparing = 22,
    CatalogDeleting = 30,
    CatalogUpdating = 31,
    CatalogArchiveUpdating = 32,
    CatalogRemoving = 33,
    Complete = 100,
    Failed = 101,
    CompleteWithErrors = 102,
    CompleteWithWarnings = 103,
    Split = 110,
    Searching = 1000,
}

impl State {
    pub const ALL: [State; 23] = [
        State::Initialising,
        State::Routing,
        State::Splitting,
        State::Indexing,
        State::CatalogPutting,
        State::TransferPutting,
        State::CatalogGetting,
        State::ArchiveGetting,
        State::TransferGetting,
        State::TransferInit,
        State::ArchiveInit,
        State::ArchivePutting,
        State::ArchivePreparing,
        State::CatalogDeleting,
        State::CatalogUpdating,
        State::CatalogArchiveUpdating,
        State::CatalogRemoving,
        State::Complete,
        State::Failed,
        State::CompleteWithErrors,
        State::CompleteWithWarnings,
        State::Split,
        State::Searching,
    ];

    pub fn value(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            State::Initialising => "INITIALISING",
            State::Routing => "ROUTING",
            State::Splitting => "SPLITTING",
            State::Indexing => "INDEXING",
            State::CatalogPutting => "CATALOG_PUTTING",
            State::TransferPutting => "TRANSFER_PUTTING",
            State::CatalogGetting => "CATALOG_GETTING",
            State::ArchiveGetting => "ARCHIVE_GETTING",
            State::TransferGetting => "TRANSFER_GETTING",
            State::TransferInit => "TRANSFER_INIT",
            State::ArchiveInit => "ARCHIVE_INIT",
            State::ArchivePutting => "ARCHIVE_PUTTING",
            State::ArchivePreparing => "ARCHIVE_PREPARING",
            State::CatalogDeleting => "CATALOG_DELETING",
            State::CatalogUpdating => "CATALOG_UPDATING",
            State::CatalogArchiveUpdating => "CATALOG_ARCHIVE_UPDATING",
            State::CatalogRemoving => "CATALOG_REMOVING",
            State::Complete => "COMPLETE",
            State::Failed => "FAILED",
            State::CompleteWithErrors => "COMPLETE_WITH_ERRORS",
            State::CompleteWithWarnings => "COMPLETE_WITH_WARNINGS",
            State::Split => "SPLIT",
            State::Searching => "SEARCHING",
        }
    }

    pub fn from_value(value: i64) -> Option<State> {
        State::ALL.into_iter().find(|s| i64::from(s.value()) == value)
    }

    /// Case-insensitive lookup by name
    pub fn from_name(name: &str) -> Option<State> {
        let upper = name.trim().to_ascii_uppercase();
        State::ALL.into_iter().find(|s| s.name() == upper)
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value().cmp(&other.value())
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts a state name or its numeric value, as the `stat` command does
impl FromStr for State {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let found = match s.trim().parse::<i64>() {
            Ok(value) => State::from_value(value),
            Err(_) => State::from_name(s),
        };
        found.ok_or_else(|| EnvelopeError::validation("state", format!("'{s}' is not a valid state")))
    }
}

struct StateVisitor;

impl Visitor<'_> for StateVisitor {
    type Value = State;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a state name or numeric state value")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<State, E> {
        State::from_value(v).ok_or_else(|| E::custom(format!("unknown state value {v}")))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<State, E> {
        let v = i64::try_from(v).map_err(|_| E::custom(format!("unknown state value {v}")))?;
        self.visit_i64(v)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<State, E> {
        State::from_name(v).ok_or_else(|| E::custom(format!("unknown state name '{v}'")))
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(StateVisitor)
    }
}
