//! Event sink contract
//!
//! A sink stores [`NormalizedEvent`]s with insert-or-ignore semantics keyed by
//! fingerprint. The uniqueness guarantee lives in the sink, not in the loader:
//! it is what makes re-running an interrupted ingestion safe.

mod postgres;

pub use postgres::{PgSink, DEDUP_INDEX, TABLE};

use async_trait::async_trait;
use thiserror::Error;

use crate::decoder::NormalizedEvent;

/// What the sink did with one insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same fingerprint already existed
    Duplicate,
}

#[derive(Debug, Error)]
pub enum SinkError {
    /// Connection, pool or protocol trouble, or a server error whose SQLSTATE
    /// class is transient. The row may succeed on a later run.
    #[error("sink unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    /// The store refused the row itself (type, range or constraint other than
    /// the fingerprint). Retrying the same row will fail the same way.
    #[error("row rejected{}: {message}", code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Rejected {
        code: Option<String>,
        message: String,
    },

    #[error("schema bootstrap failed: {0}")]
    Bootstrap(#[source] sqlx::Error),

    /// No unique index on the fingerprint column after bootstrap; inserting
    /// without it could store duplicates.
    #[error("unique index on logs.raw_sha256 is missing and could not be created")]
    DedupUnavailable,
}

impl SinkError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            code: None,
            message: message.into(),
        }
    }

    /// Whether a later run could succeed with the same row
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Unavailable(_))
    }
}

/// SQLSTATE classes that say nothing about the row itself
const TRANSIENT_SQLSTATE_CLASSES: &[&str] = &[
    "08", // connection exception
    "40", // serialization failure, deadlock
    "53", // insufficient resources
    "57", // operator intervention, query canceled
];

/// lock_not_available
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Whether a server error code means "try again later" rather than "bad row"
pub fn is_transient_sqlstate(code: &str) -> bool {
    code == LOCK_NOT_AVAILABLE
        || TRANSIENT_SQLSTATE_CLASSES
            .iter()
            .any(|class| code.starts_with(class))
}

impl From<sqlx::Error> for SinkError {
    fn from(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
            _ => true,
        };
        if transient {
            return SinkError::Unavailable(err);
        }

        match err {
            sqlx::Error::Database(db) => SinkError::Rejected {
                code: db.code().map(|c| c.into_owned()),
                message: db.message().to_string(),
            },
            other => SinkError::Unavailable(other),
        }
    }
}

/// Destination for normalized events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Create the table and the fingerprint unique index if absent.
    ///
    /// Must be idempotent and tolerate a concurrent bootstrap. Returns
    /// [`SinkError::DedupUnavailable`] when the index cannot be guaranteed.
    async fn bootstrap(&self) -> Result<(), SinkError>;

    /// Insert unless a row with the same fingerprint exists
    async fn insert_or_ignore(&self, event: &NormalizedEvent) -> Result<InsertOutcome, SinkError>;
}
