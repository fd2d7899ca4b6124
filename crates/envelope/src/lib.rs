// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Envelope - the JSON message unit of the data store's workflow
//!
//! Typed access to the `details`/`data`/`meta` sections, the compressed data
//! codec, the workflow state table, transaction state aggregation, request
//! builders for the catalog and monitor, and splitting of oversized work items.

pub mod codec;
mod envelope;
mod error;
pub mod keys;
pub mod request;
pub mod split;
mod state;
pub mod transaction;

pub use codec::{decode, encode};
pub use envelope::{ApiAction, Data, Details, Envelope, MessageType, Payload};
pub use error::{EnvelopeError, Result};
pub use request::{CatalogQuery, StatusQuery};
pub use split::split_envelope;
pub use state::State;
pub use transaction::{
    FailedFile, FailedFiles, SubRecord, TransactionRecord, TransactionStatus, aggregate,
};
