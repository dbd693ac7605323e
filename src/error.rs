//! Failure taxonomy for the sync layer.
//!
//! Only [`SyncError`] ever reaches a caller of `save()`, and only to say the
//! write was rejected and the previous state kept. Transport failures are
//! absorbed by the engine and show up as fallback mode instead.

use thiserror::Error;

/// Failure talking to the remote store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused, DNS, reset, etc.
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    /// 5xx from the remote store.
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    /// 4xx from the remote store. Never retried.
    #[error("request rejected with {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Response body was not the JSON we expected.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_) | TransportError::Timeout | TransportError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            let status = status.as_u16();
            if status >= 500 {
                TransportError::Server { status, body: e.to_string() }
            } else {
                TransportError::Rejected { status, body: e.to_string() }
            }
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

/// A record (or the collection as a whole) failed validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid record {record} in {collection}: {reason}")]
pub struct ValidationError {
    pub collection: String,
    /// Position or key of the offending record.
    pub record: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            collection: String::new(),
            record: record.into(),
            reason: reason.into(),
        }
    }

    pub fn in_collection(mut self, collection: &str) -> Self {
        self.collection = collection.to_string();
        self
    }
}

/// A write that would shrink a collection implausibly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GuardRejection {
    #[error("refusing to clear {previous} items")]
    Cleared { previous: usize },

    #[error("refusing to remove {removed} of {previous} items in one step")]
    BulkRemoval { previous: usize, removed: usize },
}

/// The remote returned nothing for a collection the ledger says had items.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("remote returned no items for {collection}, last known count was {last_known}")]
pub struct SuspiciousEmptyRemote {
    pub collection: String,
    pub last_known: usize,
}

/// Why a `save()` was refused. The previously committed value is untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Nothing has loaded yet, so there is nothing safe to overwrite.
    #[error("{0} has not finished loading")]
    NotLoaded(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Guard(#[from] GuardRejection),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Network("reset".into()).is_transient());
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Server { status: 503, body: String::new() }.is_transient());
        assert!(!TransportError::Rejected { status: 400, body: String::new() }.is_transient());
        assert!(!TransportError::Decode("eof".into()).is_transient());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("#2", "missing name").in_collection("templates");
        assert_eq!(err.to_string(), "invalid record #2 in templates: missing name");
    }
}
