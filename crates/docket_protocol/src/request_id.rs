//! Request identifiers.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

/// The reserved identifier carried by broadcast unhandled-error frames.
const BROADCAST: &str = "global";

/// A unique token correlating a call with its result frames.
///
/// Every outbound call generates a fresh identifier; the correlation table
/// scopes a pending-result slot to it until a terminal frame arrives. The
/// reserved value [`RequestId::broadcast`] is never allocated to a call and
/// routes a frame to the connection-wide error listener instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        RequestId::from_wire(&token).map_err(D::Error::custom)
    }
}

impl RequestId {
    /// Generates a fresh, globally-unique identifier.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the reserved broadcast identifier.
    pub fn broadcast() -> Self {
        Self(BROADCAST.to_string())
    }

    /// Returns true if this is the reserved broadcast identifier.
    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST
    }

    /// Wraps an identifier received on the wire.
    ///
    /// Accepts any delimiter-free token; the peer generated it, and the
    /// only requirement here is that it can be echoed back intact.
    pub fn from_wire(token: &str) -> ProtocolResult<Self> {
        if token.is_empty() {
            return Err(ProtocolError::MalformedFrame("empty request id".into()));
        }
        if token.contains(crate::frame::FRAME_DELIMITER) {
            return Err(ProtocolError::DelimiterInField(token.to_string()));
        }
        Ok(Self(token.to_string()))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_unique_and_delimiter_free() {
        let a = RequestId::fresh();
        let b = RequestId::fresh();
        assert_ne!(a, b);
        assert!(!a.as_str().contains(':'));
    }

    #[test]
    fn broadcast_is_reserved() {
        assert!(RequestId::broadcast().is_broadcast());
        assert!(!RequestId::fresh().is_broadcast());
    }

    #[test]
    fn wire_token_validation() {
        assert!(RequestId::from_wire("abc123").is_ok());
        assert!(RequestId::from_wire("").is_err());
        assert!(RequestId::from_wire("a:b").is_err());
    }
}
