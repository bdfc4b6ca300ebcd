use thiserror::Error;

use crate::model::SyncOutcome;

/// modcache error types
#[derive(Error, Debug)]
pub enum SyncError {
    /// Manifest or template could not be fetched
    #[error("Fetch failed: {url} -> {status_code}: {message}")]
    Fetch {
        url: String,
        /// HTTP status, or 0 when the request never produced a response
        status_code: u16,
        message: String,
    },

    /// Manifest body is not a JSON array of module records
    #[error("Decode error: {0}")]
    Decode(String),

    /// Template fetched but carried no `Image` field
    #[error("No image found for module {module_id}")]
    NoImageFound { module_id: String },

    /// Container runtime call failed
    #[error("Runtime error: {operation} {reference} - {message}")]
    Runtime {
        operation: String,
        reference: String,
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Build a runtime error for `operation` on `reference`.
    pub fn runtime(
        operation: impl Into<String>,
        reference: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        SyncError::Runtime {
            operation: operation.into(),
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Classify this error as the per-module outcome it produces.
    ///
    /// `Decode` and `Config` never occur at module granularity; they are
    /// mapped to `FetchFailed` so a report can still be produced.
    pub fn outcome(&self) -> SyncOutcome {
        match self {
            SyncError::Fetch { .. } | SyncError::Decode(_) | SyncError::Config(_) => {
                SyncOutcome::FetchFailed
            }
            SyncError::NoImageFound { .. } => SyncOutcome::SkippedNoImageFound,
            SyncError::Runtime { .. } | SyncError::Timeout(_) => SyncOutcome::RuntimeFailed,
            SyncError::Io(_) => SyncOutcome::ArchiveFailed,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<serde_yaml::Error> for SyncError {
    fn from(err: serde_yaml::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

/// Result type alias for modcache operations
pub type Result<T> = std::result::Result<T, SyncError>;
