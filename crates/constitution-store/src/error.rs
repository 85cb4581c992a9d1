//! Store error taxonomy.

use std::path::PathBuf;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Coarse error classification exposed to embedders.
///
/// External tooling receives a `kind` plus the rendered message; it never
/// branches on backend-specific detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    ConfigInvalid,
    BackendUnavailable,
    BackendCorrupt,
    IncompatibleSchema,
    ConflictUnresolvable,
    MigrationIntegrityFailure,
    Cancelled,
    Timeout,
    Io,
    Serialization,
}

/// Errors produced by the rule store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rule not found: {rule_id}")]
    NotFound { rule_id: String },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("backend corrupt: {}", path.display())]
    BackendCorrupt { path: PathBuf },

    #[error("incompatible schema version {found}, supported up to {supported}")]
    IncompatibleSchema { found: u32, supported: u32 },

    #[error("reconciliation aborted: {} rule(s) in conflict", rule_ids.len())]
    ConflictUnresolvable { rule_ids: Vec<String> },

    #[error("migration integrity failure: {} difference(s)", differences.len())]
    MigrationIntegrityFailure { differences: Vec<String> },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Shorthand for a [`StoreError::BackendUnavailable`] with a formatted reason.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::BackendUnavailable {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`StoreError::NotFound`].
    pub fn not_found(rule_id: impl Into<String>) -> Self {
        StoreError::NotFound {
            rule_id: rule_id.into(),
        }
    }

    /// Shorthand for a [`StoreError::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        StoreError::InvalidInput {
            message: message.into(),
        }
    }

    /// Shorthand for a [`StoreError::ConfigInvalid`].
    pub fn config_invalid(message: impl Into<String>) -> Self {
        StoreError::ConfigInvalid {
            message: message.into(),
        }
    }

    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// The taxonomy kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::InvalidInput { .. } => ErrorKind::InvalidInput,
            StoreError::ConfigInvalid { .. } => ErrorKind::ConfigInvalid,
            StoreError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            StoreError::BackendCorrupt { .. } => ErrorKind::BackendCorrupt,
            StoreError::IncompatibleSchema { .. } => ErrorKind::IncompatibleSchema,
            StoreError::ConflictUnresolvable { .. } => ErrorKind::ConflictUnresolvable,
            StoreError::MigrationIntegrityFailure { .. } => ErrorKind::MigrationIntegrityFailure,
            StoreError::Cancelled => ErrorKind::Cancelled,
            StoreError::Timeout { .. } => ErrorKind::Timeout,
            StoreError::Io { .. } => ErrorKind::Io,
            StoreError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// True when the factory may retry this operation on the alternate backend.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::BackendUnavailable)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::BackendUnavailable {
            reason: format!("sqlite: {err}"),
        }
    }
}
