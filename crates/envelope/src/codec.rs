// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Wire encoding of envelopes.
//!
//! A compressed data section is the JSON payload, zlib-deflated at level 1
//! and base64 encoded into a string.

use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::envelope::{Envelope, Payload};
use crate::error::Result;

/// Serialize, deflate and base64-encode a payload
pub fn compress_data(payload: &Payload) -> Result<String> {
    let json = serde_json::to_vec(payload)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(1));
    encoder.write_all(&json)?;
    let deflated = encoder.finish()?;
    Ok(BASE64.encode(deflated))
}

/// Inverse of [`compress_data`]
pub fn decompress_data(encoded: &str) -> Result<Payload> {
    let deflated = BASE64.decode(encoded.trim().as_bytes())?;
    let mut json = Vec::new();
    ZlibDecoder::new(deflated.as_slice()).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Parse a message body and inflate its data section if it is compressed
pub fn decode(body: &[u8]) -> Result<Envelope> {
    let mut envelope: Envelope = serde_json::from_slice(body)?;
    envelope.decompress()?;
    Ok(envelope)
}

/// Parse a message body without touching a compressed data section
pub fn decode_raw(body: &[u8]) -> Result<Envelope> {
    Ok(serde_json::from_slice(body)?)
}

/// Serialize an envelope for publishing or dumping
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(envelope)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{ApiAction, Data, Details};
    use crate::error::EnvelopeError;
    use serde_json::json;

    fn payload() -> Payload {
        let value = json!({
            "filelist": [
                {"original_path": "/gws/a.nc", "size": 1024, "tags": {"k": "v"}},
                {"original_path": "/gws/b.nc", "size": 0, "link_path": null}
            ],
            "retry_count": 2
        });
        match value {
            serde_json::Value::Object(map) => map,
            _ => Payload::new(),
        }
    }

    #[test]
    fn test_compressed_round_trip() -> anyhow::Result<()> {
        let envelope = Envelope::encode(Details::new(ApiAction::Put), payload(), true)?;
        assert!(matches!(envelope.data, Data::Compressed(_)));
        assert_eq!(envelope.details.compress, Some(true));

        let decoded = decode(&encode(&envelope)?)?;
        assert_eq!(decoded.payload()?, &payload());
        assert_eq!(decoded.details.compress, Some(false));
        Ok(())
    }

    #[test]
    fn test_plain_round_trip() -> anyhow::Result<()> {
        let envelope = Envelope::encode(Details::new(ApiAction::Get), payload(), false)?;
        assert_eq!(envelope.details.compress, None);
        let decoded = decode(&encode(&envelope)?)?;
        assert_eq!(decoded, envelope);
        Ok(())
    }

    #[test]
    fn test_decompress_is_idempotent() -> anyhow::Result<()> {
        let mut envelope = Envelope::encode(Details::new(ApiAction::Put), payload(), true)?;
        envelope.decompress()?;
        let once = envelope.clone();
        envelope.decompress()?;
        assert_eq!(envelope, once);
        Ok(())
    }

    #[test]
    fn test_compress_flag_without_string_data() {
        let body = json!({
            "details": {"api_action": "put", "compress": true},
            "data": {"filelist": []}
        });
        let err = decode(body.to_string().as_bytes()).expect_err("must fail");
        assert!(matches!(err, EnvelopeError::NotCompressed));
    }

    #[test]
    fn test_corrupt_compressed_data() {
        let body = json!({
            "details": {"api_action": "put", "compress": true},
            "data": "not base64 at all!"
        });
        assert!(decode(body.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_decode_raw_keeps_compression() -> anyhow::Result<()> {
        let envelope = Envelope::encode(Details::new(ApiAction::Put), payload(), true)?;
        let raw = decode_raw(&encode(&envelope)?)?;
        assert!(matches!(raw.data, Data::Compressed(_)));
        assert_eq!(raw.file_count()?, 2);
        Ok(())
    }
}
