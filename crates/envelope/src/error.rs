// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Errors raised while encoding, decoding or validating envelopes
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Malformed message JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid base64 in compressed data section: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Failed to compress or inflate data section: {0}")]
    Compression(#[from] std::io::Error),

    #[error(
        "DATA part of message was not compressed, despite compressed flag being set in message"
    )]
    NotCompressed,

    #[error("DATA part of message is compressed but the compressed flag is not set")]
    StillCompressed,

    #[error("Message is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Field '{field}' has unexpected type, expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
}

impl EnvelopeError {
    pub fn validation<S: Into<String>>(field: &'static str, reason: S) -> Self {
        EnvelopeError::Validation {
            field,
            reason: reason.into(),
        }
    }
}
