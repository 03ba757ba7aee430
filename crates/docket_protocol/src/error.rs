//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding frames.
///
/// Decode failures carry no usable request identifier, so both router
/// loops log them and drop the frame instead of surfacing an error to a
/// caller.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame is missing fields or otherwise structurally invalid.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Operation name is not part of the wire command set.
    #[error("unknown API method: {0}")]
    UnknownOperation(String),

    /// A result kind code outside the defined set.
    #[error("unknown result kind code: {0}")]
    UnknownResultKind(char),

    /// Payload or header is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A field that must stay delimiter-free contains the delimiter.
    #[error("field contains the frame delimiter: {0:?}")]
    DelimiterInField(String),

    /// Binary message shorter than its fixed-width prefix.
    #[error("binary message too short: {0} bytes")]
    TruncatedBinary(usize),

    /// The declared header length does not fit the message.
    #[error("binary header length mismatch: declared {declared}, available {available}")]
    HeaderLengthMismatch {
        /// Length declared by the 16-byte prefix.
        declared: usize,
        /// Bytes actually available after the prefix.
        available: usize,
    },

    /// The length prefix is not a decimal integer.
    #[error("invalid header length prefix: {0:?}")]
    InvalidLengthPrefix(String),

    /// A blob tag that is not valid UTF-8 or has the wrong width.
    #[error("invalid blob tag: {0}")]
    InvalidBlobTag(String),

    /// The blob index points outside the argument list.
    #[error("blob index {index} out of bounds for {len} arguments")]
    BlobIndexOutOfBounds {
        /// Index the header asked to substitute into.
        index: usize,
        /// Number of arguments in the header.
        len: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::UnknownOperation("frobnicate".into());
        assert_eq!(err.to_string(), "unknown API method: frobnicate");

        let err = ProtocolError::HeaderLengthMismatch {
            declared: 100,
            available: 10,
        };
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("10"));
    }
}
