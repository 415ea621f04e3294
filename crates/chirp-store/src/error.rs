//! Error types for the store client.

use thiserror::Error;

/// Errors that can occur when talking to the document/blob backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected a subscribe call (permission, transport).
    /// Surfaced to the consumer as-is; there is no automatic retry at
    /// establishment time.
    #[error("subscription failed: {0}")]
    Subscription(String),

    /// The backend rejected a create/update/delete.
    #[error("write rejected on {collection}: {message}")]
    Write { collection: String, message: String },

    /// Blob lookup failed. Callers on the read path treat this as
    /// "no blob", not as a user-visible error.
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Document not found.
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
