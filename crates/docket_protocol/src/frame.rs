//! Text frame types and codecs.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::Operation;
use crate::payload::{BinaryHandoff, ErrorPayload};
use crate::request_id::RequestId;
use serde_json::Value;

/// The field delimiter of text frames.
pub const FRAME_DELIMITER: char = ':';

/// The outcome class of a result frame, carried as a single-character code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// Code `0`: the call failed; payload is an [`ErrorPayload`].
    Error,
    /// Code `1`: the call succeeded; payload is its result.
    Success,
    /// Code `2`: one update of a live subscription; more may follow.
    Update,
    /// Code `3`: a binary payload follows out of band; payload is a
    /// [`BinaryHandoff`].
    BinaryHandoff,
    /// Code `4`: a fault unrelated to any call, addressed to the
    /// connection-wide error listener.
    UnhandledError,
}

impl ResultKind {
    /// Returns the single-character wire code.
    pub fn code(&self) -> char {
        match self {
            ResultKind::Error => '0',
            ResultKind::Success => '1',
            ResultKind::Update => '2',
            ResultKind::BinaryHandoff => '3',
            ResultKind::UnhandledError => '4',
        }
    }

    /// Converts from a wire code.
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            '0' => Some(ResultKind::Error),
            '1' => Some(ResultKind::Success),
            '2' => Some(ResultKind::Update),
            '3' => Some(ResultKind::BinaryHandoff),
            '4' => Some(ResultKind::UnhandledError),
            _ => None,
        }
    }

    /// Returns true if this kind ends the request's pending slot.
    ///
    /// Updates recur for the same request identifier; unhandled errors are
    /// never tied to one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResultKind::Error | ResultKind::Success | ResultKind::BinaryHandoff
        )
    }
}

/// A client-to-server operation invocation.
///
/// Encoded as `operation:requestId:argsJSON`. The operation name and the
/// request identifier never contain the delimiter, so the two leading
/// splits are unambiguous and the args JSON may contain `:` freely.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFrame {
    /// The operation to invoke.
    pub operation: Operation,
    /// Correlates the eventual result frames with the caller.
    pub request_id: RequestId,
    /// Positional arguments, JSON-serializable.
    pub args: Vec<Value>,
}

impl CommandFrame {
    /// Creates a command frame under a fresh request identifier.
    pub fn new(operation: Operation, args: Vec<Value>) -> Self {
        Self {
            operation,
            request_id: RequestId::fresh(),
            args,
        }
    }

    /// Creates a command frame under a caller-supplied identifier.
    pub fn with_request_id(operation: Operation, request_id: RequestId, args: Vec<Value>) -> Self {
        Self {
            operation,
            request_id,
            args,
        }
    }

    /// Encodes to the wire text form.
    pub fn encode(&self) -> ProtocolResult<String> {
        let args = serde_json::to_string(&self.args)?;
        Ok(format!(
            "{}{FRAME_DELIMITER}{}{FRAME_DELIMITER}{}",
            self.operation.as_str(),
            self.request_id,
            args
        ))
    }

    /// Decodes from the wire text form.
    ///
    /// Splits on the delimiter at most twice; the third field is parsed as
    /// a JSON array of arguments.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let mut fields = text.splitn(3, FRAME_DELIMITER);
        let operation = fields
            .next()
            .ok_or_else(|| ProtocolError::MalformedFrame("missing operation".into()))?
            .parse::<Operation>()?;
        let request_id = RequestId::from_wire(
            fields
                .next()
                .ok_or_else(|| ProtocolError::MalformedFrame("missing request id".into()))?,
        )?;
        let args_json = fields
            .next()
            .ok_or_else(|| ProtocolError::MalformedFrame("missing arguments".into()))?;
        let args: Vec<Value> = serde_json::from_str(args_json)?;

        Ok(Self {
            operation,
            request_id,
            args,
        })
    }
}

/// A server-to-client outcome frame.
///
/// Encoded as `requestId:kindCode:payloadJSON`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultFrame {
    /// Identifier of the request this frame answers, or the reserved
    /// broadcast identifier for unhandled errors.
    pub request_id: RequestId,
    /// Outcome class.
    pub kind: ResultKind,
    /// Outcome payload.
    pub payload: Value,
}

impl ResultFrame {
    /// Creates an error frame.
    pub fn error(request_id: RequestId, payload: &ErrorPayload) -> Self {
        Self {
            request_id,
            kind: ResultKind::Error,
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// Creates a success frame.
    pub fn success(request_id: RequestId, payload: Value) -> Self {
        Self {
            request_id,
            kind: ResultKind::Success,
            payload,
        }
    }

    /// Creates an update frame for a live subscription.
    pub fn update(request_id: RequestId, payload: Value) -> Self {
        Self {
            request_id,
            kind: ResultKind::Update,
            payload,
        }
    }

    /// Creates a binary-handoff frame.
    pub fn binary_handoff(request_id: RequestId, handoff: &BinaryHandoff) -> Self {
        Self {
            request_id,
            kind: ResultKind::BinaryHandoff,
            payload: serde_json::to_value(handoff).unwrap_or(Value::Null),
        }
    }

    /// Creates a broadcast unhandled-error frame.
    pub fn unhandled_error(payload: &ErrorPayload) -> Self {
        Self {
            request_id: RequestId::broadcast(),
            kind: ResultKind::UnhandledError,
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// Encodes to the wire text form.
    pub fn encode(&self) -> ProtocolResult<String> {
        let payload = serde_json::to_string(&self.payload)?;
        Ok(format!(
            "{}{FRAME_DELIMITER}{}{FRAME_DELIMITER}{}",
            self.request_id,
            self.kind.code(),
            payload
        ))
    }

    /// Decodes from the wire text form.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let mut fields = text.splitn(3, FRAME_DELIMITER);
        let request_id = RequestId::from_wire(
            fields
                .next()
                .ok_or_else(|| ProtocolError::MalformedFrame("missing request id".into()))?,
        )?;
        let kind_field = fields
            .next()
            .ok_or_else(|| ProtocolError::MalformedFrame("missing result kind".into()))?;
        let mut kind_chars = kind_field.chars();
        let kind = match (kind_chars.next(), kind_chars.next()) {
            (Some(code), None) => ResultKind::from_code(code)
                .ok_or(ProtocolError::UnknownResultKind(code))?,
            _ => {
                return Err(ProtocolError::MalformedFrame(format!(
                    "result kind must be one character, got {kind_field:?}"
                )))
            }
        };
        let payload_json = fields
            .next()
            .ok_or_else(|| ProtocolError::MalformedFrame("missing payload".into()))?;
        let payload: Value = serde_json::from_str(payload_json)?;

        Ok(Self {
            request_id,
            kind,
            payload,
        })
    }

    /// Decodes the payload as a structured error body.
    ///
    /// Falls back to wrapping the raw payload so a malformed error body
    /// still reaches the caller as an error.
    pub fn error_payload(&self) -> ErrorPayload {
        serde_json::from_value(self.payload.clone())
            .unwrap_or_else(|_| ErrorPayload::new(self.payload.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn result_kind_codes() {
        assert_eq!(ResultKind::Error.code(), '0');
        assert_eq!(ResultKind::Success.code(), '1');
        assert_eq!(ResultKind::Update.code(), '2');
        assert_eq!(ResultKind::BinaryHandoff.code(), '3');
        assert_eq!(ResultKind::UnhandledError.code(), '4');
        assert_eq!(ResultKind::from_code('5'), None);
    }

    #[test]
    fn terminal_kinds() {
        assert!(ResultKind::Error.is_terminal());
        assert!(ResultKind::Success.is_terminal());
        assert!(ResultKind::BinaryHandoff.is_terminal());
        assert!(!ResultKind::Update.is_terminal());
        assert!(!ResultKind::UnhandledError.is_terminal());
    }

    #[test]
    fn command_roundtrip() {
        let frame = CommandFrame::new(Operation::Put, vec![json!({"_id": "x"}), json!({})]);
        let encoded = frame.encode().unwrap();
        let decoded = CommandFrame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn command_args_may_contain_the_delimiter() {
        let frame = CommandFrame::new(
            Operation::Get,
            vec![json!("doc:with:colons"), json!({"rev": "1:2:3"})],
        );
        let encoded = frame.encode().unwrap();
        let decoded = CommandFrame::decode(&encoded).unwrap();
        assert_eq!(decoded.args, frame.args);
    }

    #[test]
    fn command_decode_known_shape() {
        let decoded = CommandFrame::decode(r#"put:abc123:[{"_id":"x"},{}]"#).unwrap();
        assert_eq!(decoded.operation, Operation::Put);
        assert_eq!(decoded.request_id.as_str(), "abc123");
        assert_eq!(decoded.args, vec![json!({"_id": "x"}), json!({})]);
    }

    #[test]
    fn result_roundtrip() {
        let frame = ResultFrame::success(
            RequestId::from_wire("abc123").unwrap(),
            json!({"ok": true, "id": "x", "rev": "1-abc"}),
        );
        let encoded = frame.encode().unwrap();
        assert!(encoded.starts_with("abc123:1:{"));
        assert_eq!(ResultFrame::decode(&encoded).unwrap(), frame);

        // The known wire shape decodes to the same frame.
        let known = ResultFrame::decode(r#"abc123:1:{"ok":true,"id":"x","rev":"1-abc"}"#).unwrap();
        assert_eq!(known, frame);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(CommandFrame::decode("put").is_err());
        assert!(CommandFrame::decode("put:abc").is_err());
        assert!(CommandFrame::decode("put:abc:not json").is_err());
        assert!(CommandFrame::decode("frobnicate:abc:[]").is_err());
        assert!(ResultFrame::decode("abc:9:{}").is_err());
        assert!(ResultFrame::decode("abc:11:{}").is_err());
        assert!(ResultFrame::decode(":1:{}").is_err());
    }

    #[test]
    fn broadcast_error_frame() {
        let frame = ResultFrame::unhandled_error(&ErrorPayload::new("view function threw"));
        let encoded = frame.encode().unwrap();
        assert!(encoded.starts_with("global:4:"));

        let decoded = ResultFrame::decode(&encoded).unwrap();
        assert!(decoded.request_id.is_broadcast());
        assert_eq!(decoded.kind, ResultKind::UnhandledError);
    }

    #[test]
    fn error_payload_fallback() {
        let frame = ResultFrame {
            request_id: RequestId::fresh(),
            kind: ResultKind::Error,
            payload: json!(["unexpected", "shape"]),
        };
        let payload = frame.error_payload();
        assert!(payload.error.contains("unexpected"));
    }

    fn arb_json(depth: u32) -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,24}".prop_map(Value::from),
        ];
        leaf.prop_recursive(depth, 32, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[ -~]{0,12}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn command_roundtrip_for_arbitrary_args(args in prop::collection::vec(arb_json(3), 0..4)) {
            let frame = CommandFrame::new(Operation::BulkDocs, args);
            let encoded = frame.encode().unwrap();
            let decoded = CommandFrame::decode(&encoded).unwrap();
            prop_assert_eq!(decoded, frame);
        }

        #[test]
        fn result_roundtrip_for_arbitrary_payloads(payload in arb_json(3)) {
            let frame = ResultFrame::success(RequestId::fresh(), payload);
            let encoded = frame.encode().unwrap();
            let decoded = ResultFrame::decode(&encoded).unwrap();
            prop_assert_eq!(decoded, frame);
        }
    }
}
