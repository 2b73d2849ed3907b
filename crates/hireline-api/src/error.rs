//! Error types for the backend clients.

use thiserror::Error;

/// Errors that can occur when talking to the pull API or the realtime channel.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed (connection refused, timeout, body read).
    #[error("HTTP error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record not found.
    #[error("record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// Non-success status with a server-supplied message.
    #[error("request failed ({status}): {message}")]
    Server { status: u16, message: String },

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The realtime provider rejected or terminated a subscription.
    #[error("subscription error: {0}")]
    Subscription(String),
}
