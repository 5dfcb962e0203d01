//! Error types for the model manager and model store.

use meshtopo_types::SchemaVersion;
use thiserror::Error;

/// Errors raised while mutating the dependency model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A control event was missing required fields.
    #[error("invalid {event} event: {reason}")]
    InvalidEvent { event: &'static str, reason: String },

    /// A span batch could not be turned into graph mutations.
    #[error("invalid span batch: {0}")]
    InvalidBatch(String),

    /// An edge tried to link nodes of two different runtimes.
    #[error("edge endpoints belong to different runtimes: {from} and {to}")]
    CrossRuntimeEdge { from: String, to: String },

    /// Persisting or restoring a snapshot failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ModelError {
    pub(crate) fn invalid_event(event: &'static str, reason: impl Into<String>) -> Self {
        ModelError::InvalidEvent {
            event,
            reason: reason.into(),
        }
    }
}

/// Errors raised by snapshot backends and codecs.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot could not be encoded.
    #[error("failed to encode snapshot: {0}")]
    Encode(String),

    /// The stored bytes are not a valid snapshot.
    #[error("failed to decode snapshot: {0}")]
    Decode(String),

    /// The snapshot was written by an incompatible schema version.
    #[error("snapshot schema {found} is not compatible with {expected}")]
    Incompatible {
        found: SchemaVersion,
        expected: SchemaVersion,
    },

    /// The backend refused the operation.
    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
}
