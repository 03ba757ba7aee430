//! Option types for database operations.

use crate::error::{ClientError, ClientResult};
use serde::Serialize;
use serde_json::Value;

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Identifies the logical database a session binds to.
///
/// Either built from an explicit url/name pair, or parsed from a single
/// address split at the last `/`. The name keys the client's connection
/// cache; the url is where the connector dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Server address, e.g. `db.example.com:5984`.
    pub url: String,
    /// Logical database name.
    pub name: String,
    /// Ask the server-side engine to compact automatically.
    pub auto_compaction: bool,
    /// Revision history bound, if any.
    pub revs_limit: Option<u32>,
}

impl DatabaseOptions {
    /// Creates options from an explicit url and name.
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            auto_compaction: false,
            revs_limit: None,
        }
    }

    /// Parses a combined address, splitting at the last `/`.
    pub fn parse(address: &str) -> ClientResult<Self> {
        let (url, name) = address
            .rsplit_once('/')
            .ok_or(ClientError::InvalidAddress)?;
        let options = Self::new(url, name);
        options.validate()?;
        Ok(options)
    }

    /// Enables automatic compaction.
    pub fn with_auto_compaction(mut self, enabled: bool) -> Self {
        self.auto_compaction = enabled;
        self
    }

    /// Sets the revision history bound.
    pub fn with_revs_limit(mut self, limit: u32) -> Self {
        self.revs_limit = Some(limit);
        self
    }

    /// Fails if the url or name is missing.
    pub fn validate(&self) -> ClientResult<()> {
        if self.url.is_empty() || self.name.is_empty() {
            return Err(ClientError::InvalidAddress);
        }
        Ok(())
    }

    /// Builds the argument object for the `createDatabase` command.
    pub(crate) fn create_args(&self) -> Value {
        let mut args = serde_json::json!({
            "name": self.name,
            "auto_compaction": self.auto_compaction,
        });
        if let Some(limit) = self.revs_limit {
            args["revs_limit"] = Value::from(limit);
        }
        args
    }
}

/// Options for `get`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GetOptions {
    /// Fetch this revision instead of the winner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Include conflicting revisions.
    #[serde(skip_serializing_if = "is_false")]
    pub conflicts: bool,
    /// Include full attachment bodies instead of stubs.
    #[serde(skip_serializing_if = "is_false")]
    pub attachments: bool,
    /// The caller intends to decode attachment bodies to raw bytes.
    #[serde(skip_serializing_if = "is_false")]
    pub binary: bool,
}

impl GetOptions {
    /// Fetches a specific revision.
    pub fn rev(rev: impl Into<String>) -> Self {
        Self {
            rev: Some(rev.into()),
            ..Self::default()
        }
    }

    /// Includes full attachment bodies.
    pub fn with_attachments(mut self) -> Self {
        self.attachments = true;
        self
    }
}

/// Options for `allDocs`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AllDocsOptions {
    /// Include document bodies in the rows.
    #[serde(skip_serializing_if = "is_false")]
    pub include_docs: bool,
    /// Include full attachment bodies instead of stubs.
    #[serde(skip_serializing_if = "is_false")]
    pub attachments: bool,
    /// The caller intends to decode attachment bodies to raw bytes.
    #[serde(skip_serializing_if = "is_false")]
    pub binary: bool,
    /// First key to include.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startkey: Option<String>,
    /// Last key to include.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endkey: Option<String>,
    /// Maximum number of rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Rows to skip before the first returned one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
}

impl AllDocsOptions {
    /// Includes document bodies.
    pub fn with_docs() -> Self {
        Self {
            include_docs: true,
            ..Self::default()
        }
    }
}

/// Options for `query`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOptions {
    /// Include document bodies in the rows.
    #[serde(skip_serializing_if = "is_false")]
    pub include_docs: bool,
    /// Include full attachment bodies instead of stubs.
    #[serde(skip_serializing_if = "is_false")]
    pub attachments: bool,
    /// The caller intends to decode attachment bodies to raw bytes.
    #[serde(skip_serializing_if = "is_false")]
    pub binary: bool,
    /// Reduce the view results.
    #[serde(skip_serializing_if = "is_false")]
    pub reduce: bool,
}

/// Options for `changes` and `liveChanges`.
#[derive(Debug, Clone, Serialize)]
pub struct ChangesOptions {
    /// Deliver changes after this sequence number.
    pub since: u64,
    /// Include document bodies in change rows.
    #[serde(skip_serializing_if = "is_false")]
    pub include_docs: bool,
    /// Include full attachment bodies instead of stubs.
    #[serde(skip_serializing_if = "is_false")]
    pub attachments: bool,
    /// The caller intends to decode attachment bodies to raw bytes.
    #[serde(skip_serializing_if = "is_false")]
    pub binary: bool,
    /// Keep the buffered per-change rows in the result.
    ///
    /// When false, the client discards the rows after delivery and keeps
    /// only the summary fields. Ignored for live subscriptions.
    #[serde(skip_serializing)]
    pub return_docs: bool,
    /// Stop the feed after this many changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl Default for ChangesOptions {
    fn default() -> Self {
        Self {
            since: 0,
            include_docs: false,
            attachments: false,
            binary: false,
            return_docs: true,
            limit: None,
        }
    }
}

impl ChangesOptions {
    /// Starts after the given sequence number.
    pub fn since(since: u64) -> Self {
        Self {
            since,
            ..Self::default()
        }
    }

    /// Includes document bodies.
    pub fn with_docs(mut self) -> Self {
        self.include_docs = true;
        self
    }

    /// Discards buffered rows, keeping only summary fields.
    pub fn summary_only(mut self) -> Self {
        self.return_docs = false;
        self
    }

    /// Bounds the feed to `limit` changes.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

pub(crate) fn to_args<T: Serialize>(options: &T) -> ClientResult<Value> {
    serde_json::to_value(options)
        .map_err(|e| ClientError::Protocol(docket_protocol::ProtocolError::Json(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_at_the_last_slash() {
        let options = DatabaseOptions::parse("ws://example.com:5984/path/mydb").unwrap();
        assert_eq!(options.url, "ws://example.com:5984/path");
        assert_eq!(options.name, "mydb");
    }

    #[test]
    fn missing_pieces_fail_locally() {
        assert!(DatabaseOptions::parse("no-slash-here").is_err());
        assert!(DatabaseOptions::parse("/onlyname").is_err());
        assert!(DatabaseOptions::parse("onlyurl/").is_err());
        assert!(DatabaseOptions::new("", "db").validate().is_err());
        assert!(DatabaseOptions::new("host", "").validate().is_err());
    }

    #[test]
    fn create_args_shape() {
        let options = DatabaseOptions::new("host", "mydb").with_auto_compaction(true);
        assert_eq!(
            options.create_args(),
            serde_json::json!({"name": "mydb", "auto_compaction": true})
        );

        let options = DatabaseOptions::new("host", "mydb").with_revs_limit(20);
        assert_eq!(options.create_args()["revs_limit"], 20);
    }

    #[test]
    fn default_options_serialize_sparsely() {
        let value = to_args(&GetOptions::default()).unwrap();
        assert_eq!(value, serde_json::json!({}));

        let value = to_args(&ChangesOptions::since(7)).unwrap();
        assert_eq!(value, serde_json::json!({"since": 7}));

        let value = to_args(&GetOptions::rev("1-abc")).unwrap();
        assert_eq!(value, serde_json::json!({"rev": "1-abc"}));
    }
}
