//! # Docket Protocol
//!
//! Wire frames and codecs for the docket socket protocol.
//!
//! This crate provides:
//! - The closed set of wire operations ([`Operation`])
//! - Request identifiers correlating calls with results ([`RequestId`])
//! - Text frame types and codecs ([`CommandFrame`], [`ResultFrame`])
//! - The binary attachment transfer protocol ([`BinaryHeader`], [`BlobTag`])
//! - Two-part blob reassembly ([`BlobAssembler`])
//!
//! ## Wire format
//!
//! Two frame shapes travel on one ordered, full-duplex connection:
//!
//! - **Text frames**: `<field>:<field>:<jsonPayload>` with `:` as the
//!   delimiter. Decoding splits at most twice, so the trailing JSON may
//!   itself contain the delimiter.
//! - **Binary frames**: a 16-byte decimal header length, a JSON header and
//!   a trailing opaque payload (uploads), or a 36-byte blob tag and a
//!   trailing payload (downloads).
//!
//! The codec is pure: it performs no I/O and holds no connection state
//! other than the reassembly table.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod assembly;
mod binary;
mod error;
mod frame;
mod operation;
mod payload;
mod request_id;

pub use assembly::{AssembledBlob, BlobAssembler, DEFAULT_PENDING_CAPACITY};
pub use binary::{
    decode_upload_frame, encode_tagged_payload, encode_upload_frame, split_tagged_payload,
    BinaryHeader, BlobTag, BLOB_TAG_LEN, HEADER_LEN_WIDTH,
};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{CommandFrame, ResultFrame, ResultKind, FRAME_DELIMITER};
pub use operation::Operation;
pub use payload::{BinaryHandoff, ErrorPayload};
pub use request_id::RequestId;
