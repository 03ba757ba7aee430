//! The closed set of wire operations.

use crate::error::ProtocolError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A database operation carried by a command frame.
///
/// The wire command set is closed: every inbound frame names one of these
/// operations, and anything else is answered with an
/// `unknown API method` error rather than dispatched dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Bind this connection to a logical database, creating it on demand.
    CreateDatabase,
    /// Return the connection identity.
    Id,
    /// Return database information.
    Info,
    /// Write a single document.
    Put,
    /// Write a batch of documents.
    BulkDocs,
    /// Write a document with a generated identifier.
    Post,
    /// Delete a document revision.
    Remove,
    /// Compute which revisions are missing from the database.
    RevsDiff,
    /// Compact the database.
    Compact,
    /// Clean up stale view indexes.
    ViewCleanup,
    /// Delete an attachment.
    RemoveAttachment,
    /// Upload an attachment (binary frame).
    PutAttachment,
    /// Read a single document.
    Get,
    /// Run a view query.
    Query,
    /// Enumerate documents.
    AllDocs,
    /// Fetch a buffered change listing.
    Changes,
    /// Download an attachment (two-part binary result).
    GetAttachment,
    /// Open a live change subscription.
    LiveChanges,
    /// Cancel a live change subscription.
    CancelChanges,
    /// Destroy the database bound to this connection.
    Destroy,
}

impl Operation {
    /// All operations, in wire-name order.
    pub const ALL: [Operation; 20] = [
        Operation::CreateDatabase,
        Operation::Id,
        Operation::Info,
        Operation::Put,
        Operation::BulkDocs,
        Operation::Post,
        Operation::Remove,
        Operation::RevsDiff,
        Operation::Compact,
        Operation::ViewCleanup,
        Operation::RemoveAttachment,
        Operation::PutAttachment,
        Operation::Get,
        Operation::Query,
        Operation::AllDocs,
        Operation::Changes,
        Operation::GetAttachment,
        Operation::LiveChanges,
        Operation::CancelChanges,
        Operation::Destroy,
    ];

    /// Returns the wire name of the operation.
    ///
    /// Invariant: wire names never contain the frame delimiter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateDatabase => "createDatabase",
            Operation::Id => "id",
            Operation::Info => "info",
            Operation::Put => "put",
            Operation::BulkDocs => "bulkDocs",
            Operation::Post => "post",
            Operation::Remove => "remove",
            Operation::RevsDiff => "revsDiff",
            Operation::Compact => "compact",
            Operation::ViewCleanup => "viewCleanup",
            Operation::RemoveAttachment => "removeAttachment",
            Operation::PutAttachment => "putAttachment",
            Operation::Get => "get",
            Operation::Query => "query",
            Operation::AllDocs => "allDocs",
            Operation::Changes => "changes",
            Operation::GetAttachment => "getAttachment",
            Operation::LiveChanges => "liveChanges",
            Operation::CancelChanges => "cancelChanges",
            Operation::Destroy => "destroy",
        }
    }

    /// Returns true for operations whose results can carry inline
    /// attachment bodies.
    ///
    /// The dispatcher forces these to a JSON-safe representation before
    /// invoking the engine.
    pub fn may_return_binary(&self) -> bool {
        matches!(
            self,
            Operation::Get | Operation::Query | Operation::AllDocs
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createDatabase" => Ok(Operation::CreateDatabase),
            "id" => Ok(Operation::Id),
            "info" => Ok(Operation::Info),
            "put" => Ok(Operation::Put),
            "bulkDocs" => Ok(Operation::BulkDocs),
            "post" => Ok(Operation::Post),
            "remove" => Ok(Operation::Remove),
            "revsDiff" => Ok(Operation::RevsDiff),
            "compact" => Ok(Operation::Compact),
            "viewCleanup" => Ok(Operation::ViewCleanup),
            "removeAttachment" => Ok(Operation::RemoveAttachment),
            "putAttachment" => Ok(Operation::PutAttachment),
            "get" => Ok(Operation::Get),
            "query" => Ok(Operation::Query),
            "allDocs" => Ok(Operation::AllDocs),
            "changes" => Ok(Operation::Changes),
            "getAttachment" => Ok(Operation::GetAttachment),
            "liveChanges" => Ok(Operation::LiveChanges),
            "cancelChanges" => Ok(Operation::CancelChanges),
            "destroy" => Ok(Operation::Destroy),
            other => Err(ProtocolError::UnknownOperation(other.to_string())),
        }
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_roundtrip() {
        for op in Operation::ALL {
            let parsed: Operation = op.as_str().parse().unwrap();
            assert_eq!(parsed, op);
        }
    }

    #[test]
    fn wire_names_are_delimiter_free() {
        for op in Operation::ALL {
            assert!(!op.as_str().contains(':'), "{op} contains the delimiter");
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "mapReduce".parse::<Operation>().unwrap_err();
        assert_eq!(err.to_string(), "unknown API method: mapReduce");
    }

    #[test]
    fn binary_capable_operations() {
        assert!(Operation::Get.may_return_binary());
        assert!(Operation::Query.may_return_binary());
        assert!(Operation::AllDocs.may_return_binary());
        assert!(!Operation::Put.may_return_binary());
        assert!(!Operation::GetAttachment.may_return_binary());
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&Operation::BulkDocs).unwrap();
        assert_eq!(json, "\"bulkDocs\"");

        let op: Operation = serde_json::from_str("\"getAttachment\"").unwrap();
        assert_eq!(op, Operation::GetAttachment);
    }
}
