// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Read-only queries against the catalog and monitor services

use envelope::{CatalogQuery, Envelope, StatusQuery, TransactionRecord, keys};

use crate::error::{RabbitError, Result};
use crate::rpc::RpcClient;

pub const CATALOG_SERVICE: &str = "Catalog";
pub const MONITOR_SERVICE: &str = "Monitoring";

async fn call_service(
    rpc: &RpcClient,
    routing_key: &str,
    service: &str,
    request: &mut Envelope,
) -> Result<Envelope> {
    rpc.call_envelope(routing_key, request)
        .await?
        .ok_or_else(|| RabbitError::unreachable(service))
}

/// List holdings matching the query
pub async fn list_holdings(rpc: &RpcClient, query: &CatalogQuery) -> Result<Envelope> {
    let mut request = query.list_request()?;
    call_service(rpc, keys::CATALOG_Q, CATALOG_SERVICE, &mut request).await
}

/// Find files matching the query
pub async fn find_files(rpc: &RpcClient, query: &CatalogQuery) -> Result<Envelope> {
    let mut request = query.find_request()?;
    call_service(rpc, keys::CATALOG_Q, CATALOG_SERVICE, &mut request).await
}

/// Transaction status from the monitor.
///
/// When the monitor returns records, its response goes on to the catalog,
/// which adds holding labels. The catalog's answer is returned if it comes;
/// otherwise the monitor's stands. An empty record list ends the chain.
pub async fn request_status(rpc: &RpcClient, query: &StatusQuery) -> Result<Envelope> {
    let mut request = query.request()?;
    let response = call_service(rpc, keys::MONITOR_Q, MONITOR_SERVICE, &mut request).await?;
    if response.details.failure().is_some() {
        return Ok(response);
    }
    if response.data_list(keys::RECORD_LIST)?.is_empty() {
        return Ok(response);
    }

    let mut forward = response.clone();
    match rpc.call_envelope(keys::CATALOG_Q, &mut forward).await {
        Ok(Some(labelled)) => Ok(labelled),
        Ok(None) | Err(RabbitError::Unroutable { .. }) => {
            diagnostics::warn!("Catalog did not label the transaction records, using the monitor response");
            Ok(response)
        }
        Err(err) => Err(err),
    }
}

/// The transaction records of a status response
pub fn transaction_records(response: &Envelope) -> Result<Vec<TransactionRecord>> {
    let records = response.data_list(keys::RECORD_LIST)?;
    records
        .iter()
        .map(|record| {
            serde_json::from_value(record.clone())
                .map_err(|e| RabbitError::Envelope(envelope::EnvelopeError::Json(e)))
        })
        .collect()
}
