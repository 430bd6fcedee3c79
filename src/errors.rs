use std::time::Duration;

use thiserror::Error;

use crate::path::FieldPath;

/// Top-level error type returned by the mschema library.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is missing or invalid; raised before any I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying database operation failed.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// A declarative schema file could not be parsed.
    #[error("schema format error at '{path}': {message}")]
    SchemaFormat { path: String, message: String },

    /// A plan file could not be parsed.
    #[error("plan format error: {0}")]
    PlanFormat(String),

    /// A non-nullable `add_field` has no default and no operator
    /// override was supplied; the executor refuses to run.
    #[error("plan requires operator input for '{path}': non-nullable field has no default")]
    PlanRequiresInput { path: FieldPath },

    /// A batch-level adapter failure stopped the executor; resume with
    /// `last_key` to continue where it left off.
    #[error("execution aborted (resume from {last_key:?}): {source}")]
    ExecutionAborted {
        last_key: Option<String>,
        #[source]
        source: AdapterError,
    },
}

impl Error {
    /// Convenience constructor for schema-format errors.
    pub fn schema_format(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SchemaFormat {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Failures surfaced by a [`DatabaseAdapter`](crate::adapter::DatabaseAdapter).
///
/// The executor treats [`AdapterError::Document`] as a per-document
/// failure (counted, not raised); everything else aborts the run.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// MongoDB driver failure (transport, auth, server error).
    #[error("mongodb error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// Operation exceeded the adapter's configured timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Failure scoped to a single document; the batch continues.
    #[error("document '{key}': {message}")]
    Document { key: String, message: String },

    /// Adapter-specific failure not covered above.
    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    pub fn document(key: impl Into<String>, message: impl Into<String>) -> Self {
        AdapterError::Document {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether the executor should isolate this failure to one document.
    pub fn is_document_level(&self) -> bool {
        matches!(self, AdapterError::Document { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
