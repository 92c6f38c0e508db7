//! Error types for the tracking and sync pipeline.
//!
//! Two families are kept apart:
//! - [`TrackError`]: local failures (SQLite, migrations, blob encoding).
//! - [`RemoteError`]: outcomes of a remote persist call, classified so the
//!   retry policy and the sync reconciler can decide what to do with them.
//!
//! Noisy location fixes are never errors; see [`crate::tracker::NoiseReason`].

use thiserror::Error;

/// Local storage and encoding errors.
#[derive(Debug, Error)]
pub enum TrackError {
    /// SQLite error from the durable store
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Schema migration failed while opening the store
    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    /// Queued workout could not be encoded for storage
    #[error("Failed to encode queued workout: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Queued workout blob could not be decoded
    #[error("Failed to decode queued workout '{id}': {source}")]
    Decode {
        id: String,
        #[source]
        source: rmp_serde::decode::Error,
    },

    /// Cache payload or FFI JSON could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A thread panicked while holding the store lock
    #[error("Offline store lock poisoned")]
    LockPoisoned,
}

/// Result type alias for local operations.
pub type Result<T> = std::result::Result<T, TrackError>;

/// Outcome classes of a failed remote persist call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Backend metadata/schema cache is stale. The only retried class.
    #[error("Transient backend fault: {message}")]
    TransientBackendFault { message: String },

    /// Permission, validation or any other non-retryable rejection
    #[error("Remote store rejected workout{}: {}", status_suffix(.status), .message)]
    Permanent {
        status: Option<u16>,
        message: String,
    },

    /// The device could not reach the remote store at all
    #[error("Connectivity unavailable: {message}")]
    ConnectivityUnavailable { message: String },

    /// The caller aborted the call; not a failure
    #[error("Remote call cancelled")]
    Cancelled,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" (HTTP {code})")).unwrap_or_default()
}

impl RemoteError {
    /// Whether the bounded retry policy may try this call again.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::TransientBackendFault { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RemoteError::Cancelled)
    }
}
