//! Error types for the sync layer.

use std::sync::Arc;

use hireline_api::ApiError;
use thiserror::Error;

/// Errors surfaced by stores and queues.
///
/// Backend errors are shared behind an `Arc` because the same failure is
/// published to every watcher of a store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The pull API or realtime channel failed.
    #[error(transparent)]
    Api(Arc<ApiError>),

    /// No record with this id is held locally.
    #[error("no local record with id {0}")]
    UnknownRecord(String),

    /// No optimistic operation with this temporary id.
    #[error("no optimistic operation with id {0}")]
    UnknownOperation(String),

    /// The operation is not in a state that allows this action.
    #[error("operation {temp_id} is {status}, expected {expected}")]
    InvalidTransition {
        temp_id: String,
        status: &'static str,
        expected: &'static str,
    },

    /// The background mutation task was dropped before reporting.
    #[error("mutation task aborted")]
    Aborted,
}

impl From<ApiError> for StoreError {
    fn from(e: ApiError) -> Self {
        StoreError::Api(Arc::new(e))
    }
}

impl From<Arc<ApiError>> for StoreError {
    fn from(e: Arc<ApiError>) -> Self {
        StoreError::Api(e)
    }
}

/// Invalid sync configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Missing { field: &'static str },

    #[error("{field} must start with {expected} (got '{value}')")]
    Scheme {
        field: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{field} must be between {min} and {max} seconds (got {value})")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] ApiError),
}
