// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Wire names shared with the catalog and monitor services

use crate::error::{EnvelopeError, Result};

// Details keys
pub const ID: &str = "id";
pub const TRANSACT_ID: &str = "transaction_id";
pub const SUB_ID: &str = "sub_id";
pub const USER: &str = "user";
pub const GROUP: &str = "group";
pub const GROUPALL: &str = "groupall";
pub const API_ACTION: &str = "api_action";
pub const HOLDING_ID: &str = "holding_id";
pub const LABEL: &str = "label";
pub const TAG: &str = "tag";
pub const STATE: &str = "state";
pub const JOB_LABEL: &str = "job_label";
pub const ROUTE: &str = "route";
pub const COMPRESS: &str = "compress";
pub const USER_QUERY: &str = "user_query";
pub const GROUP_QUERY: &str = "group_query";
pub const LIMIT: &str = "limit";
pub const DESCENDING: &str = "descending";
pub const FAILURE: &str = "failure";
pub const WARNING: &str = "warning";
pub const ROUTING_KEY: &str = "routing_key";
pub const PATH: &str = "path";

// Data keys
pub const FILELIST: &str = "filelist";
pub const RECORD_LIST: &str = "records";
pub const HOLDING_LIST: &str = "holdings";

// RPC targets and actions
pub const LIST: &str = "list";
pub const FIND: &str = "find";
pub const STAT: &str = "stat";
pub const META_ACTION: &str = "meta";
pub const CATALOG_Q: &str = "catalog_q";
pub const MONITOR_Q: &str = "monitor_q";

/// The three parts of a consumer-targeted routing key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingKey<'a> {
    pub scope: &'a str,
    pub action: &'a str,
    pub stage: &'a str,
}

/// Verify and split a `<scope>.<action>.<stage>` routing key
pub fn split_routing_key(routing_key: &str) -> Result<RoutingKey<'_>> {
    let parts: Vec<&str> = routing_key.split('.').collect();
    match parts.as_slice() {
        [scope, action, stage] => Ok(RoutingKey {
            scope: *scope,
            action: *action,
            stage: *stage,
        }),
        _ => Err(EnvelopeError::validation(
            ROUTING_KEY,
            format!("routing key ({routing_key}) malformed, should consist of 3 parts"),
        )),
    }
}
