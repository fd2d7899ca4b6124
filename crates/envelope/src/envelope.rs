// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;
use crate::error::{EnvelopeError, Result};
use crate::keys;
use crate::state::State;

/// JSON object used for the `data` and `meta` sections
pub type Payload = serde_json::Map<String, Value>;

/// The `api_action` a message carries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ApiAction {
    List,
    Find,
    Stat,
    Meta,
    Get,
    Put,
    GetList,
    PutList,
    ArchivePut,
    ArchiveGet,
    Other(String),
}

impl ApiAction {
    pub fn as_str(&self) -> &str {
        match self {
            ApiAction::List => keys::LIST,
            ApiAction::Find => keys::FIND,
            ApiAction::Stat => keys::STAT,
            ApiAction::Meta => keys::META_ACTION,
            ApiAction::Get => "get",
            ApiAction::Put => "put",
            ApiAction::GetList => "getlist",
            ApiAction::PutList => "putlist",
            ApiAction::ArchivePut => "archive-put",
            ApiAction::ArchiveGet => "archive-get",
            ApiAction::Other(action) => action,
        }
    }
}

impl From<String> for ApiAction {
    fn from(action: String) -> Self {
        match action.as_str() {
            keys::LIST => ApiAction::List,
            keys::FIND => ApiAction::Find,
            keys::STAT => ApiAction::Stat,
            keys::META_ACTION => ApiAction::Meta,
            "get" => ApiAction::Get,
            "put" => ApiAction::Put,
            "getlist" => ApiAction::GetList,
            "putlist" => ApiAction::PutList,
            "archive-put" => ApiAction::ArchivePut,
            "archive-get" => ApiAction::ArchiveGet,
            _ => ApiAction::Other(action),
        }
    }
}

impl From<ApiAction> for String {
    fn from(action: ApiAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for ApiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport discriminator, currently always `standard`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[default]
    #[serde(rename = "standard")]
    Standard,
}

/// The `details` section of an envelope.
///
/// Keys the admin layer understands are typed. Anything else the workflow
/// put there is carried through untouched in `extra`, and typed keys that
/// arrived as `null` are written back as `null`, so a split or dumped
/// message keeps every field of its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Details {
    pub api_action: ApiAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groupall: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holding_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descending: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    #[serde(flatten)]
    pub extra: Payload,
    #[serde(skip)]
    null_keys: BTreeSet<&'static str>,
}

/// The typed `details` keys that may be present with a `null` value
const TYPED_KEYS: [&str; 20] = [
    keys::USER,
    keys::GROUP,
    keys::GROUPALL,
    keys::ID,
    keys::TRANSACT_ID,
    keys::SUB_ID,
    keys::HOLDING_ID,
    keys::LABEL,
    keys::TAG,
    keys::STATE,
    keys::JOB_LABEL,
    keys::ROUTE,
    keys::COMPRESS,
    keys::USER_QUERY,
    keys::GROUP_QUERY,
    keys::LIMIT,
    keys::DESCENDING,
    keys::FAILURE,
    keys::WARNING,
    keys::ROUTING_KEY,
];

impl Details {
    pub fn new(api_action: ApiAction) -> Self {
        Self {
            api_action,
            user: None,
            group: None,
            groupall: None,
            id: None,
            transaction_id: None,
            sub_id: None,
            holding_id: None,
            label: None,
            tag: None,
            state: None,
            job_label: None,
            route: None,
            compress: None,
            user_query: None,
            group_query: None,
            limit: None,
            descending: None,
            failure: None,
            warning: None,
            routing_key: None,
            extra: Payload::new(),
            null_keys: BTreeSet::new(),
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compress.unwrap_or(false)
    }

    /// Failure reported by a service, if it is non-empty
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref().filter(|f| !f.is_empty())
    }
}

/// The `data` section: a JSON object, or its compressed base64 form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Data {
    Compressed(String),
    Plain(Payload),
}

impl Default for Data {
    fn default() -> Self {
        Data::Plain(Payload::new())
    }
}

/// Serde adapter for the `details` section that remembers typed keys sent
/// as `null`
mod details_section {
    use std::collections::BTreeSet;

    use serde::{Deserialize, Deserializer, Serialize, Serializer, de, ser};
    use serde_json::Value;

    use super::{Details, Payload, TYPED_KEYS};

    pub fn serialize<S: Serializer>(details: &Details, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = match serde_json::to_value(details).map_err(<S::Error as ser::Error>::custom)? {
            Value::Object(map) => map,
            _ => return Err(<S::Error as ser::Error>::custom("details is not an object")),
        };
        for key in &details.null_keys {
            map.entry(*key).or_insert(Value::Null);
        }
        map.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Details, D::Error> {
        let map = Payload::deserialize(deserializer)?;
        let null_keys: BTreeSet<&'static str> = TYPED_KEYS
            .iter()
            .copied()
            .filter(|key| map.get(*key).is_some_and(Value::is_null))
            .collect();
        let mut details: Details = serde_json::from_value(Value::Object(map))
            .map_err(<D::Error as de::Error>::custom)?;
        details.null_keys = null_keys;
        Ok(details)
    }
}

/// A message exchanged over the broker, both for RPC calls and queued work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "details_section")]
    pub details: Details,
    #[serde(default)]
    pub data: Data,
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Envelope {
    /// Build an uncompressed envelope
    pub fn new(details: Details, payload: Payload) -> Self {
        Self {
            details,
            data: Data::Plain(payload),
            kind: MessageType::Standard,
            meta: None,
            timestamp: None,
        }
    }

    /// Build an envelope, compressing the payload when asked
    pub fn encode(details: Details, payload: Payload, compress: bool) -> Result<Self> {
        let mut envelope = Envelope::new(details, Payload::new());
        envelope.set_payload(payload, compress)?;
        Ok(envelope)
    }

    /// Replace the data section and keep the compress flag in step with it
    pub fn set_payload(&mut self, payload: Payload, compress: bool) -> Result<()> {
        if compress {
            self.data = Data::Compressed(codec::compress_data(&payload)?);
            self.details.compress = Some(true);
        } else {
            self.data = Data::Plain(payload);
            if self.details.compress.is_some() {
                self.details.compress = Some(false);
            }
        }
        Ok(())
    }

    /// Inflate the data section in place if the compress flag is set.
    ///
    /// Clears the flag afterwards, so calling this again is a no-op.
    pub fn decompress(&mut self) -> Result<()> {
        if !self.details.is_compressed() {
            return Ok(());
        }
        let payload = match &self.data {
            Data::Compressed(encoded) => codec::decompress_data(encoded)?,
            Data::Plain(_) => return Err(EnvelopeError::NotCompressed),
        };
        self.data = Data::Plain(payload);
        self.details.compress = Some(false);
        Ok(())
    }

    /// The decoded payload. Fails if the data section is still compressed.
    pub fn payload(&self) -> Result<&Payload> {
        match &self.data {
            Data::Plain(payload) => Ok(payload),
            Data::Compressed(_) => Err(EnvelopeError::StillCompressed),
        }
    }

    pub fn payload_mut(&mut self) -> Result<&mut Payload> {
        match &mut self.data {
            Data::Plain(payload) => Ok(payload),
            Data::Compressed(_) => Err(EnvelopeError::StillCompressed),
        }
    }

    /// The ordered file list carried by queued work items
    pub fn filelist(&self) -> Result<&Vec<Value>> {
        match self.payload()?.get(keys::FILELIST) {
            Some(Value::Array(files)) => Ok(files),
            Some(_) => Err(EnvelopeError::InvalidField {
                field: keys::FILELIST,
                expected: "an array",
            }),
            None => Err(EnvelopeError::MissingField(keys::FILELIST)),
        }
    }

    /// Number of files, whether or not the data section is compressed
    pub fn file_count(&self) -> Result<usize> {
        if self.details.is_compressed() {
            let mut copy = self.clone();
            copy.decompress()?;
            return Ok(copy.filelist()?.len());
        }
        Ok(self.filelist()?.len())
    }

    /// Look up a list in the data section, e.g. `holdings` or `records`
    pub fn data_list(&self, key: &'static str) -> Result<&Vec<Value>> {
        match self.payload()?.get(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(EnvelopeError::InvalidField {
                field: key,
                expected: "an array",
            }),
            None => Err(EnvelopeError::MissingField(key)),
        }
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.as_ref()?.get(key)?.as_str()
    }
}
