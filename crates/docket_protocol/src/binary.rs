//! Binary frame codecs for attachment transfer.
//!
//! Uploads travel as one message: a fixed-width decimal header length, a
//! JSON header naming the operation and the argument slot the payload
//! belongs in, then the raw payload. Downloads travel as two messages tied
//! together by a [`BlobTag`]: a JSON handoff frame (see
//! [`crate::BinaryHandoff`]) and a raw message whose first 36 bytes are the
//! tag.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::Operation;
use crate::request_id::RequestId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Width of the ASCII decimal header-length prefix.
pub const HEADER_LEN_WIDTH: usize = 16;

/// Width of a blob tag: a hyphenated UUID.
pub const BLOB_TAG_LEN: usize = 36;

/// The JSON header of a binary upload frame.
///
/// `blob_index` names the positional argument the raw payload is
/// substituted into before dispatch, so the receiver can treat the result
/// exactly like a decoded command frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryHeader {
    /// Positional arguments; `args[blob_index]` is a placeholder.
    pub args: Vec<Value>,
    /// Index of the argument the payload replaces.
    pub blob_index: usize,
    /// Correlates the upload with its result frames.
    pub request_id: RequestId,
    /// The operation to invoke.
    pub operation: Operation,
}

impl BinaryHeader {
    /// Creates a header under a fresh request identifier.
    pub fn new(operation: Operation, args: Vec<Value>, blob_index: usize) -> Self {
        Self {
            args,
            blob_index,
            request_id: RequestId::fresh(),
            operation,
        }
    }
}

/// Encodes a binary upload frame.
///
/// Layout: `[16-byte zero-padded decimal header length][header JSON][payload]`.
/// Zero-length payloads are valid.
pub fn encode_upload_frame(header: &BinaryHeader, payload: &[u8]) -> ProtocolResult<Bytes> {
    if header.blob_index >= header.args.len() {
        return Err(ProtocolError::BlobIndexOutOfBounds {
            index: header.blob_index,
            len: header.args.len(),
        });
    }

    let header_json = serde_json::to_vec(header)?;
    let mut message =
        Vec::with_capacity(HEADER_LEN_WIDTH + header_json.len() + payload.len());
    message.extend_from_slice(format!("{:016}", header_json.len()).as_bytes());
    message.extend_from_slice(&header_json);
    message.extend_from_slice(payload);
    Ok(Bytes::from(message))
}

/// Decodes a binary upload frame into its header and opaque payload.
///
/// The declared header length must fit inside the message exactly as
/// written; everything after the header is the payload.
pub fn decode_upload_frame(message: &[u8]) -> ProtocolResult<(BinaryHeader, Bytes)> {
    if message.len() < HEADER_LEN_WIDTH {
        return Err(ProtocolError::TruncatedBinary(message.len()));
    }

    let prefix = std::str::from_utf8(&message[..HEADER_LEN_WIDTH])
        .map_err(|_| ProtocolError::InvalidLengthPrefix("not UTF-8".into()))?;
    let declared: usize = prefix
        .parse()
        .map_err(|_| ProtocolError::InvalidLengthPrefix(prefix.to_string()))?;

    let available = message.len() - HEADER_LEN_WIDTH;
    if declared > available {
        return Err(ProtocolError::HeaderLengthMismatch {
            declared,
            available,
        });
    }

    let header_bytes = &message[HEADER_LEN_WIDTH..HEADER_LEN_WIDTH + declared];
    let header: BinaryHeader = serde_json::from_slice(header_bytes)?;
    if header.blob_index >= header.args.len() {
        return Err(ProtocolError::BlobIndexOutOfBounds {
            index: header.blob_index,
            len: header.args.len(),
        });
    }

    let payload = Bytes::copy_from_slice(&message[HEADER_LEN_WIDTH + declared..]);
    Ok((header, payload))
}

/// A token pairing a raw download payload with its metadata frame.
///
/// Always exactly [`BLOB_TAG_LEN`] bytes on the wire, so the receiver can
/// split a tagged message without any delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobTag(String);

impl BlobTag {
    /// Generates a fresh tag.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parses a tag from its fixed-width wire bytes.
    pub fn from_wire(bytes: &[u8]) -> ProtocolResult<Self> {
        if bytes.len() != BLOB_TAG_LEN {
            return Err(ProtocolError::InvalidBlobTag(format!(
                "expected {BLOB_TAG_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let tag = std::str::from_utf8(bytes)
            .map_err(|_| ProtocolError::InvalidBlobTag("not UTF-8".into()))?;
        Ok(Self(tag.to_string()))
    }

    /// Returns the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefixes a raw payload with its tag for the wire.
pub fn encode_tagged_payload(tag: &BlobTag, payload: &[u8]) -> Bytes {
    let mut message = Vec::with_capacity(BLOB_TAG_LEN + payload.len());
    message.extend_from_slice(tag.as_str().as_bytes());
    message.extend_from_slice(payload);
    Bytes::from(message)
}

/// Splits a tagged message into its tag and payload.
pub fn split_tagged_payload(message: &[u8]) -> ProtocolResult<(BlobTag, Bytes)> {
    if message.len() < BLOB_TAG_LEN {
        return Err(ProtocolError::TruncatedBinary(message.len()));
    }
    let tag = BlobTag::from_wire(&message[..BLOB_TAG_LEN])?;
    Ok((tag, Bytes::copy_from_slice(&message[BLOB_TAG_LEN..])))
}
