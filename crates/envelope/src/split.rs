// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Partitioning an oversized work item into several sub-work-items

use std::collections::HashSet;

use serde_json::Value;
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::{EnvelopeError, Result};
use crate::keys;

/// Split `files` into consecutive chunks of at most `chunk_size` entries.
///
/// An empty list still yields one (empty) chunk, so a message is never
/// reduced to nothing.
pub fn partition_filelist(files: &[Value], chunk_size: usize) -> Result<Vec<Vec<Value>>> {
    if chunk_size == 0 {
        return Err(EnvelopeError::validation(
            "chunk_size",
            "must be at least one file per message",
        ));
    }
    if files.is_empty() {
        return Ok(vec![Vec::new()]);
    }
    Ok(files.chunks(chunk_size).map(<[Value]>::to_vec).collect())
}

/// Split a decoded work item into envelopes of at most `chunk_size` files.
///
/// The first chunk keeps the parent's sub_id so monitoring treats it as a
/// continuation. Every later chunk gets a fresh sub_id that differs from the
/// parent and from all siblings. Each chunk's data section is compressed when
/// `compress` is set. The input may still be compressed; it is inflated first.
pub fn split_envelope(envelope: &Envelope, chunk_size: usize, compress: bool) -> Result<Vec<Envelope>> {
    let mut parent = envelope.clone();
    parent.decompress()?;

    let parent_sub_id = parent
        .details
        .sub_id
        .clone()
        .ok_or(EnvelopeError::MissingField(keys::SUB_ID))?;
    let chunks = partition_filelist(parent.filelist()?, chunk_size)?;

    let mut used: HashSet<String> = HashSet::from([parent_sub_id.clone()]);
    let mut out = Vec::with_capacity(chunks.len());
    for (index, files) in chunks.into_iter().enumerate() {
        let sub_id = if index == 0 {
            parent_sub_id.clone()
        } else {
            fresh_sub_id(&mut used)
        };

        let mut chunk = parent.clone();
        chunk.details.sub_id = Some(sub_id);
        let mut payload = parent.payload()?.clone();
        payload.insert(keys::FILELIST.to_string(), Value::Array(files));
        chunk.set_payload(payload, compress)?;
        out.push(chunk);
    }
    Ok(out)
}

fn fresh_sub_id(used: &mut HashSet<String>) -> String {
    loop {
        let candidate = Uuid::new_v4().to_string();
        if used.insert(candidate.clone()) {
            return candidate;
        }
    }
}

/// Concatenate the file lists of decoded chunks, in order
pub fn rejoin_filelists(chunks: &[Envelope]) -> Result<Vec<Value>> {
    let mut files = Vec::new();
    for chunk in chunks {
        let mut chunk = chunk.clone();
        chunk.decompress()?;
        files.extend(chunk.filelist()?.iter().cloned());
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{ApiAction, Details, Payload};
    use serde_json::json;

    const SUB_ID: &str = "0b0c6f6e-2222-4d9a-8a1b-4f5e6d7c8b9a";

    fn work_item(n_files: usize, compress: bool) -> Envelope {
        let mut details = Details::new(ApiAction::PutList);
        details.user = Some("alice".to_string());
        details.transaction_id = Some("5c3f1e8a-1111-4c61-9f5a-0d1a2b3c4d5e".to_string());
        details.sub_id = Some(SUB_ID.to_string());
        let files: Vec<Value> = (0..n_files)
            .map(|i| json!({"original_path": format!("/gws/file_{i}.nc")}))
            .collect();
        let mut payload = Payload::new();
        payload.insert(keys::FILELIST.to_string(), Value::Array(files));
        payload.insert("retry_count".to_string(), json!(0));
        Envelope::encode(details, payload, compress).expect("encode")
    }

    #[test]
    fn test_split_2500_by_1000() -> anyhow::Result<()> {
        let parent = work_item(2500, false);
        let chunks = split_envelope(&parent, 1000, false)?;
        let sizes: Vec<usize> = chunks.iter().map(|c| c.filelist().map(Vec::len)).collect::<Result<_>>()?;
        assert_eq!(sizes, vec![1000, 1000, 500]);

        assert_eq!(chunks[0].details.sub_id.as_deref(), Some(SUB_ID));
        let ids: HashSet<&str> = chunks.iter().filter_map(|c| c.details.sub_id.as_deref()).collect();
        assert_eq!(ids.len(), 3);
        for chunk in &chunks[1..] {
            let id = chunk.details.sub_id.as_deref().unwrap_or_default();
            assert_ne!(id, SUB_ID);
            assert!(Uuid::parse_str(id).is_ok());
        }

        assert_eq!(rejoin_filelists(&chunks)?, *parent.filelist()?);
        Ok(())
    }

    #[test]
    fn test_split_keeps_other_fields() -> anyhow::Result<()> {
        let chunks = split_envelope(&work_item(3, false), 2, false)?;
        for chunk in &chunks {
            assert_eq!(chunk.details.user.as_deref(), Some("alice"));
            assert_eq!(chunk.payload()?.get("retry_count"), Some(&json!(0)));
        }
        Ok(())
    }

    #[test]
    fn test_split_keeps_null_details() -> anyhow::Result<()> {
        let body = json!({
            "details": {
                "api_action": "putlist",
                "transaction_id": "5c3f1e8a-1111-4c61-9f5a-0d1a2b3c4d5e",
                "sub_id": SUB_ID,
                "label": null,
                "holding_id": null,
                "job_label": null,
                "tenancy": null
            },
            "data": {"filelist": [
                {"original_path": "/gws/a.nc"},
                {"original_path": "/gws/b.nc"},
                {"original_path": "/gws/c.nc"}
            ]},
            "type": "standard"
        });
        let parent = crate::codec::decode(body.to_string().as_bytes())?;
        let chunks = split_envelope(&parent, 2, false)?;
        assert_eq!(chunks.len(), 2);

        for chunk in &chunks {
            let wire: Value = serde_json::from_slice(&crate::codec::encode(chunk)?)?;
            for key in ["label", "holding_id", "job_label", "tenancy"] {
                assert_eq!(wire["details"].get(key), Some(&Value::Null), "{key}");
            }
            assert!(wire["details"].get("compress").is_none());
        }
        assert_eq!(chunks[0].details.sub_id.as_deref(), Some(SUB_ID));
        assert_ne!(chunks[1].details.sub_id.as_deref(), Some(SUB_ID));
        Ok(())
    }

    #[test]
    fn test_split_compressed_input_and_output() -> anyhow::Result<()> {
        let parent = work_item(5, true);
        let chunks = split_envelope(&parent, 2, true)?;
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.details.compress == Some(true)));

        let mut original = parent.clone();
        original.decompress()?;
        assert_eq!(rejoin_filelists(&chunks)?, *original.filelist()?);

        let plain = split_envelope(&parent, 2, false)?;
        assert!(plain.iter().all(|c| c.details.compress == Some(false)));
        Ok(())
    }

    #[test]
    fn test_chunk_size_at_least_list_length() -> anyhow::Result<()> {
        let parent = work_item(10, false);
        let chunks = split_envelope(&parent, 10, false)?;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], parent);
        Ok(())
    }

    #[test]
    fn test_empty_filelist_keeps_message() -> anyhow::Result<()> {
        let chunks = split_envelope(&work_item(0, false), 100, false)?;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].details.sub_id.as_deref(), Some(SUB_ID));
        Ok(())
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(partition_filelist(&[json!(1)], 0).is_err());

        let mut no_sub_id = work_item(3, false);
        no_sub_id.details.sub_id = None;
        assert!(matches!(
            split_envelope(&no_sub_id, 1, false),
            Err(EnvelopeError::MissingField("sub_id"))
        ));
    }
}
