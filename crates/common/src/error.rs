//! Error types for VBoxDash

use thiserror::Error;

/// Result type alias using VBoxDash Error
pub type Result<T> = std::result::Result<T, Error>;

/// VBoxDash error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Malformed JSON from a remote store.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource already exists: {kind} with id {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Remote store error: {0}")]
    Remote(String),
}

impl Error {
    /// True when the error is a uniqueness violation on insert.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }
}
