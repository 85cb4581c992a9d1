//! Core error taxonomy, layered over the store's.

use std::path::PathBuf;
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Catalog load failures. Any of these aborts the load; the previous
/// catalog (if one exists) stays in effect.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(
        "duplicate rule id '{rule_id}': first defined in {}, redefined in {}",
        first_file.display(),
        second_file.display()
    )]
    DuplicateIdentifier {
        rule_id: String,
        first_file: PathBuf,
        second_file: PathBuf,
    },

    #[error("invalid rule '{rule_id}': missing or malformed field '{field}'")]
    InvalidRule { rule_id: String, field: String },

    #[error(
        "metadata mismatch in {}: declares {declared} rules, contains {actual}",
        file.display()
    )]
    MetadataMismatch {
        file: PathBuf,
        declared: usize,
        actual: usize,
    },

    #[error("unparseable rule document {}: {message}", file.display())]
    Document { file: PathBuf, message: String },

    #[error("cannot read rule directory {}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by the validation core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Store(#[from] constitution_store::StoreError),

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        CoreError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}
