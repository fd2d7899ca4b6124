// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! `list`, `find` and `stat`: read-only queries of the catalog and monitor

use anyhow::{Result, bail};
use clap::Args;
use envelope::{CatalogQuery, Envelope, StatusQuery, keys};
use rabbit::RpcClient;
use rabbit::queries;

use crate::prints::{self, ADMIN_USER, Listing, View};

/// Time ordering of results, `-9`/`--descending` or `-0`/`--ascending`
#[derive(Args, Debug, Clone, Default)]
pub struct OrderArgs {
    /// Newest first
    #[arg(short = '9', long, conflicts_with = "ascending")]
    pub descending: bool,
    /// Oldest first
    #[arg(short = '0', long)]
    pub ascending: bool,
}

impl OrderArgs {
    pub fn is_descending(&self, default: bool) -> bool {
        match (self.descending, self.ascending) {
            (true, _) => true,
            (_, true) => false,
            _ => default,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// The username to list holdings for
    #[arg(short, long)]
    pub user: Option<String>,
    /// The group to list holdings for
    #[arg(short, long)]
    pub group: Option<String>,
    /// List holdings that belong to a group, rather than a single user
    #[arg(short = 'A', long)]
    pub groupall: bool,
    /// The label of the holding(s) to list, a regular expression
    #[arg(short, long)]
    pub label: Option<String>,
    /// The numeric id of the holding to list
    #[arg(short = 'i', long = "holding_id")]
    pub holding_id: Option<i64>,
    /// The UUID of the transaction to list
    #[arg(short = 'n', long = "transaction_id")]
    pub transaction_id: Option<String>,
    /// The tag(s) of the holding(s) to list, `key:value,key2:value2`
    #[arg(short, long)]
    pub tag: Option<String>,
    /// Output the result as JSON
    #[arg(short, long)]
    pub json: bool,
    /// Limit the number of holdings to list
    #[arg(short = 'L', long)]
    pub limit: Option<u64>,
    #[command(flatten)]
    pub order: OrderArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FindArgs {
    /// The username to find files for
    #[arg(short, long)]
    pub user: Option<String>,
    /// The group to find files for
    #[arg(short, long)]
    pub group: Option<String>,
    /// Find files that belong to a group, rather than a single user
    #[arg(short = 'A', long)]
    pub groupall: bool,
    /// The label of the holding the files belong to, a regular expression
    #[arg(short, long)]
    pub label: Option<String>,
    /// The numeric id of the holding the files belong to
    #[arg(short = 'i', long = "holding_id")]
    pub holding_id: Option<i64>,
    /// The UUID of the transaction to list
    #[arg(short = 'n', long = "transaction_id")]
    pub transaction_id: Option<String>,
    /// The path of the files to find, a regular expression
    #[arg(short, long)]
    pub path: Option<String>,
    /// The tag(s) of the holding(s) to find files within
    #[arg(short, long)]
    pub tag: Option<String>,
    /// Output the result as JSON
    #[arg(short, long)]
    pub json: bool,
    /// One file per line, path only
    #[arg(short = '1', long)]
    pub simple: bool,
    /// Show the object storage URL of each file
    #[arg(short = 'U', long)]
    pub url: bool,
    /// Limit the number of files to list
    #[arg(short = 'L', long)]
    pub limit: Option<u64>,
    #[command(flatten)]
    pub order: OrderArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct StatArgs {
    /// The username to list transactions for
    #[arg(short, long)]
    pub user: Option<String>,
    /// The group to list transactions for
    #[arg(short, long)]
    pub group: Option<String>,
    /// List transactions that belong to a group, rather than a single user
    #[arg(short = 'A', long)]
    pub groupall: bool,
    /// The numeric id of the transaction to list
    #[arg(short, long)]
    pub id: Option<i64>,
    /// The UUID of the transaction to list
    #[arg(short = 'n', long = "transaction_id")]
    pub transaction_id: Option<String>,
    /// The job label of the transaction(s) to list
    #[arg(short = 'b', long = "job_label")]
    pub job_label: Option<String>,
    /// The state of the transactions to list, by name (e.g. COMPLETE) or number
    #[arg(short, long)]
    pub state: Option<String>,
    /// The sub id of one part of a split transaction
    #[arg(long = "sub_id")]
    pub sub_id: Option<String>,
    /// The api action of the transactions: get, put, getlist or putlist
    #[arg(short, long = "api_action")]
    pub api_action: Option<String>,
    /// Output the result as JSON
    #[arg(short, long)]
    pub json: bool,
    /// Limit the number of transactions to list
    #[arg(short = 'L', long)]
    pub limit: Option<u64>,
    #[command(flatten)]
    pub order: OrderArgs,
}

fn json_output(response: &Envelope) -> Result<String> {
    let mut out = serde_json::to_string_pretty(response)?;
    out.push('\n');
    Ok(out)
}

fn header(response: &Envelope, descending: bool, view: View) -> String {
    let meta = response.meta.clone().unwrap_or_default();
    prints::construct_header_string(&response.details, &meta, descending, view)
}

fn check_failure(response: &Envelope, what: &str, descending: bool, view: View) -> Result<()> {
    if let Some(failure) = response.details.failure() {
        bail!("Failed to {what} {}\n{failure}", header(response, descending, view));
    }
    Ok(())
}

pub async fn list_command(rpc: &RpcClient, args: &ListArgs) -> Result<String> {
    let descending = args.order.is_descending(false);
    let query = CatalogQuery {
        user: ADMIN_USER.to_string(),
        group: String::new(),
        groupall: args.groupall,
        label: args.label.clone(),
        holding_id: args.holding_id,
        transaction_id: args.transaction_id.clone(),
        path: None,
        tag: args.tag.clone(),
        query_user: args.user.clone(),
        query_group: args.group.clone(),
        limit: args.limit,
        descending,
    };
    let response = queries::list_holdings(rpc, &query).await?;
    check_failure(&response, "list holdings", descending, View::default())?;
    if args.json {
        return json_output(&response);
    }

    let holdings = prints::parse_holdings(response.data_list(keys::HOLDING_LIST)?)?;
    let header = header(&response, descending, View::default());
    Ok(prints::render(&Listing::Holdings(holdings), &header, View::default())?)
}

pub async fn find_command(rpc: &RpcClient, args: &FindArgs) -> Result<String> {
    let descending = args.order.is_descending(false);
    let view = View {
        simple: args.simple,
        url: args.url,
    };
    let query = CatalogQuery {
        user: ADMIN_USER.to_string(),
        group: String::new(),
        groupall: args.groupall,
        label: args.label.clone(),
        holding_id: args.holding_id,
        transaction_id: args.transaction_id.clone(),
        path: args.path.clone(),
        tag: args.tag.clone(),
        query_user: args.user.clone(),
        query_group: args.group.clone(),
        limit: args.limit,
        descending,
    };
    let response = queries::find_files(rpc, &query).await?;
    check_failure(&response, "find files", descending, view)?;
    if args.json {
        return json_output(&response);
    }

    let holdings = match response.payload()?.get(keys::HOLDING_LIST) {
        Some(holdings) => prints::parse_file_holdings(holdings)?,
        None => Vec::new(),
    };
    let header = header(&response, descending, view);
    Ok(prints::render(&Listing::Files(holdings), &header, view)?)
}

pub async fn stat_command(rpc: &RpcClient, args: &StatArgs) -> Result<String> {
    let descending = args.order.is_descending(true);
    let query = StatusQuery {
        user: ADMIN_USER.to_string(),
        group: String::new(),
        groupall: args.groupall,
        id: args.id,
        transaction_id: args.transaction_id.clone(),
        job_label: args.job_label.clone(),
        state: args.state.clone(),
        sub_id: args.sub_id.clone(),
        api_action: args.api_action.clone(),
        query_user: args.user.clone(),
        query_group: args.group.clone(),
        limit: args.limit,
        descending,
    };
    let response = queries::request_status(rpc, &query).await?;
    check_failure(&response, "get transaction state", descending, View::default())?;
    if args.json {
        return json_output(&response);
    }

    let records = queries::transaction_records(&response)?;
    let header = header(&response, descending, View::default());
    Ok(prints::render(&Listing::Transactions(records), &header, View::default())?)
}
