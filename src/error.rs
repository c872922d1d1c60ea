//! Typed error kinds shared across the engine.
//!
//! Pipeline and CLI code uses `anyhow::Result` for propagation; this enum
//! gives the recoverable failure classes a stable identity so batch
//! operations can collect them into `errors[]` without aborting, and so
//! callers can decide between fail-open and fail-closed handling.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Unknown entity, document, or session.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique violation. Upserts resolve these internally; surfacing one
    /// means a caller bypassed the upsert path.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed caller input.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Per-file parse failure. Collected into batch `errors[]`, never fatal
    /// to a directory index.
    #[error("parse failure in {file}: {message}")]
    ParseFailure { file: String, message: String },

    /// An external embedding/model/LLM provider could not be reached or
    /// returned an unusable response.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The operation observed its cancellation signal.
    #[error("operation cancelled")]
    Cancelled,

    /// Unrecoverable storage failure; aborts the enclosing transaction.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl CoreError {
    pub fn parse_failure(file: &str, message: impl std::fmt::Display) -> Self {
        CoreError::ParseFailure {
            file: file.to_string(),
            message: message.to_string(),
        }
    }
}
