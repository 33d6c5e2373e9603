//! Error types for hybrid storage operations

use crate::qualify::{QualifyCounts, QualifyFailure};
use std::time::Duration;
use thiserror::Error;

/// Authorization failures raised by the write gate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The request carried no API key at all
    #[error("no api key attached to request")]
    MissingIdentity,

    /// The API key has no matching grant for this source
    #[error("api key lacks '{permission}' permission on source '{source_name}'")]
    Denied {
        /// Permission that was requested
        permission: String,
        /// Source (named graph) the permission was checked against
        source_name: String,
    },
}

/// Hybrid storage error type
#[derive(Error, Debug)]
pub enum HybridError {
    /// Malformed stream, dataset, triple batch or query
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing identity or insufficient permission
    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthError),

    /// Stream referenced by an ingestion call does not exist
    #[error("No such stream (source: {source_name}, name: {name})")]
    NotFound {
        /// Source of the missing stream
        source_name: String,
        /// Name of the missing stream
        name: String,
    },

    /// Staging, merge or commit failure inside a transaction
    #[error("Transaction error ({context}): {source}")]
    Transaction {
        /// Stage at which the transaction failed
        context: String,
        /// Underlying driver error
        #[source]
        source: sqlx::Error,
    },

    /// Rollback failed after the work itself failed; always fatal
    #[error("Error ({original}) occurred during transaction. Could not rollback: {rollback}")]
    Rollback {
        /// Error raised by the transactional work
        original: Box<HybridError>,
        /// Error raised by the rollback attempt
        rollback: sqlx::Error,
    },

    /// Reasoner unreachable or returned a malformed response
    #[error("Upstream reasoner error: {0}")]
    Upstream(String),

    /// Some qualification jobs failed; completed counts are preserved
    #[error("Qualification partially failed: {} of the jobs failed (first: {})", .failures.len(), first_failure(.failures))]
    PartialFailure {
        /// Counts accumulated from every job that completed
        counts: QualifyCounts,
        /// Every job failure that was reported
        failures: Vec<QualifyFailure>,
    },

    /// Database error outside a transaction
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error on an output sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow IPC framing error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Stored triple could not be decoded or re-encoded
    #[error("RDF error: {0}")]
    Rdf(String),

    /// Operation exceeded its deadline
    #[error("Operation '{operation}' timed out after {elapsed:?}")]
    Timeout {
        /// Operation category or name
        operation: String,
        /// Deadline that was exceeded
        elapsed: Duration,
    },

    /// Caller cancelled the request
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

fn first_failure(failures: &[QualifyFailure]) -> String {
    failures
        .first()
        .map(|f| f.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rejected before any store access
    Validation,
    /// Missing or insufficient capability
    Authorization,
    /// Referenced stream absent
    NotFound,
    /// Transaction, rollback or database failure
    Transaction,
    /// Reasoner failure
    Upstream,
    /// Partial qualification results
    PartialFailure,
    /// Deadline exceeded or cancelled
    Interrupted,
    /// Output, framing or encoding failure
    Output,
    /// Configuration problem
    Config,
}

impl HybridError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an upstream error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Wrap a driver error raised at a given transaction stage
    pub fn transaction(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Transaction {
            context: context.into(),
            source,
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Transaction { .. } | Self::Rollback { .. } | Self::Database(_) => {
                ErrorKind::Transaction
            }
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::PartialFailure { .. } => ErrorKind::PartialFailure,
            Self::Timeout { .. } | Self::Cancelled => ErrorKind::Interrupted,
            Self::Io(_) | Self::Arrow(_) | Self::Rdf(_) => ErrorKind::Output,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Rollback failures leave the connection in an unknown state and are never retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }
}

impl From<reqwest::Error> for HybridError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

/// Result type for hybrid storage operations
pub type HybridResult<T> = std::result::Result<T, HybridError>;
