// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Request envelopes for the catalog and monitor services.
//!
//! All validation happens here, before anything is sent.

use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use crate::envelope::{ApiAction, Details, Envelope, Payload};
use crate::error::{EnvelopeError, Result};
use crate::keys;
use crate::state::State;

/// Parse a `key:value,key2:value2` tag string, braces optional.
///
/// Entries without a `:` are skipped.
pub fn parse_tags(tag: &str) -> BTreeMap<String, String> {
    tag.replace(['{', '}'], "")
        .split(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once(':')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Check that a user supplied identifier is a UUID
pub fn validate_uuid(field: &'static str, value: &str) -> Result<()> {
    Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| EnvelopeError::validation(field, format!("'{value}' is not a valid uuid-4")))
}

/// Query against the catalog: `list` holdings or `find` files
#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    pub user: String,
    pub group: String,
    pub groupall: bool,
    pub label: Option<String>,
    pub holding_id: Option<i64>,
    pub transaction_id: Option<String>,
    pub path: Option<String>,
    pub tag: Option<String>,
    pub query_user: Option<String>,
    pub query_group: Option<String>,
    pub limit: Option<u64>,
    pub descending: bool,
}

impl CatalogQuery {
    pub fn list_request(&self) -> Result<Envelope> {
        self.request(ApiAction::List)
    }

    pub fn find_request(&self) -> Result<Envelope> {
        self.request(ApiAction::Find)
    }

    fn request(&self, action: ApiAction) -> Result<Envelope> {
        if let Some(transaction_id) = &self.transaction_id {
            validate_uuid(keys::TRANSACT_ID, transaction_id)?;
        }

        let find = action == ApiAction::Find;
        let mut details = Details::new(action);
        details.user = Some(self.user.clone());
        details.group = Some(self.group.clone());
        details.groupall = Some(self.groupall);
        details.user_query = self.query_user.clone();
        details.group_query = self.query_group.clone();
        details.limit = self.limit;
        details.descending = Some(self.descending);

        let mut meta = Payload::new();
        if let Some(label) = &self.label {
            meta.insert(keys::LABEL.to_string(), Value::from(label.clone()));
        }
        if let Some(holding_id) = self.holding_id {
            meta.insert(keys::HOLDING_ID.to_string(), Value::from(holding_id));
        }
        if let Some(transaction_id) = &self.transaction_id {
            meta.insert(keys::TRANSACT_ID.to_string(), Value::from(transaction_id.clone()));
        }
        if find {
            if let Some(path) = &self.path {
                meta.insert(keys::PATH.to_string(), Value::from(path.clone()));
            }
        }
        if let Some(tag) = &self.tag {
            let tags: serde_json::Map<String, Value> = parse_tags(tag)
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect();
            meta.insert(keys::TAG.to_string(), Value::Object(tags));
        }

        let mut envelope = Envelope::new(details, Payload::new());
        if !meta.is_empty() {
            envelope.meta = Some(meta);
        }
        Ok(envelope)
    }
}

/// Query against the monitor: transaction status
#[derive(Debug, Clone, Default)]
pub struct StatusQuery {
    pub user: String,
    pub group: String,
    pub groupall: bool,
    pub id: Option<i64>,
    pub transaction_id: Option<String>,
    pub job_label: Option<String>,
    /// State name or numeric value
    pub state: Option<String>,
    pub sub_id: Option<String>,
    /// Filter on the api action of the transactions, e.g. `put`
    pub api_action: Option<String>,
    pub query_user: Option<String>,
    pub query_group: Option<String>,
    pub limit: Option<u64>,
    pub descending: bool,
}

impl StatusQuery {
    pub fn request(&self) -> Result<Envelope> {
        let state = match &self.state {
            Some(state) => Some(state.parse::<State>()?),
            None => None,
        };
        if let Some(transaction_id) = &self.transaction_id {
            validate_uuid(keys::TRANSACT_ID, transaction_id)?;
        }
        if let Some(sub_id) = &self.sub_id {
            validate_uuid(keys::SUB_ID, sub_id)?;
        }

        let mut details = Details::new(ApiAction::Stat);
        details.user = Some(self.user.clone());
        details.group = Some(self.group.clone());
        details.groupall = Some(self.groupall);
        details.id = self.id;
        details.transaction_id = self.transaction_id.clone();
        details.job_label = self.job_label.clone();
        details.state = state;
        details.sub_id = self.sub_id.clone();
        details.user_query = self.query_user.clone();
        details.group_query = self.query_group.clone();
        details.limit = self.limit;
        details.descending = Some(self.descending);

        let mut envelope = Envelope::new(details, Payload::new());
        if let Some(api_action) = &self.api_action {
            let mut meta = Payload::new();
            meta.insert(keys::API_ACTION.to_string(), Value::from(api_action.clone()));
            envelope.meta = Some(meta);
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags("{project:cmip6, run : r1i1p1,junk}");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("project").map(String::as_str), Some("cmip6"));
        assert_eq!(tags.get("run").map(String::as_str), Some("r1i1p1"));
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn test_list_request() -> anyhow::Result<()> {
        let query = CatalogQuery {
            user: "nlds".to_string(),
            label: Some("^run".to_string()),
            holding_id: Some(12),
            tag: Some("a:b".to_string()),
            path: Some("/ignored".to_string()),
            query_user: Some("alice".to_string()),
            ..Default::default()
        };
        let envelope = query.list_request()?;
        let value = serde_json::to_value(&envelope)?;
        assert_eq!(value["details"]["api_action"], json!("list"));
        assert_eq!(value["details"]["user_query"], json!("alice"));
        assert_eq!(value["meta"]["holding_id"], json!(12));
        assert_eq!(value["meta"]["tag"], json!({"a": "b"}));
        assert!(value["meta"].get("path").is_none());
        assert_eq!(value["type"], json!("standard"));

        let find = query.find_request()?;
        assert_eq!(find.meta_str("path"), Some("/ignored"));
        Ok(())
    }

    #[test]
    fn test_invalid_transaction_id_is_rejected() {
        let query = CatalogQuery {
            transaction_id: Some("not-a-uuid".to_string()),
            ..Default::default()
        };
        let err = query.list_request().expect_err("invalid uuid");
        assert!(err.to_string().contains("transaction_id"));
    }

    #[test]
    fn test_status_request_validation() -> anyhow::Result<()> {
        let mut query = StatusQuery {
            user: "nlds".to_string(),
            state: Some("complete".to_string()),
            sub_id: Some("007075b2-8c79-4cfa-a1e5-0aaa65892454".to_string()),
            api_action: Some("put".to_string()),
            descending: true,
            ..Default::default()
        };
        let envelope = query.request()?;
        assert_eq!(envelope.details.state, Some(State::Complete));
        assert_eq!(envelope.details.api_action, ApiAction::Stat);
        assert_eq!(envelope.meta_str("api_action"), Some("put"));

        query.state = Some("21".to_string());
        assert_eq!(query.request()?.details.state, Some(State::ArchivePutting));

        query.state = Some("NOT_A_STATE".to_string());
        let err = query.request().expect_err("invalid state");
        assert!(err.to_string().contains("state"));

        query.state = None;
        query.sub_id = Some("1234".to_string());
        let err = query.request().expect_err("invalid sub id");
        assert!(err.to_string().contains("sub_id"));
        Ok(())
    }
}
