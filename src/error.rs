//! Error types for Lampstand
//!
//! This module defines all error types used throughout the library,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Lampstand operations
///
/// Covers the quota ledger, the chat session store, the completion
/// service and the ambient configuration/storage concerns. Fallible
/// functions return [`Result`], which wraps these variants in
/// `anyhow::Error`; callers recover the variant with `downcast_ref`.
#[derive(Error, Debug)]
pub enum LampstandError {
    /// The durable record store could not be reached for a read or write
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The user has no remaining message quota in the current window
    #[error("Message quota exceeded: {count}/{limit}")]
    QuotaExceeded {
        /// Messages recorded in the current window
        count: u32,
        /// Effective limit for the user
        limit: u32,
    },

    /// No session matched the given slug (or it is not visible to the caller)
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The streaming completion call rejected or returned an error payload
    #[error("Completion failed: {0}")]
    CompletionFailed(String),

    /// A request was rejected before reaching the store
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A stored row could not be mapped onto a domain record
    #[error("Invalid record in table {table}: {message}")]
    InvalidRecord {
        /// Table the row was read from
        table: String,
        /// What was wrong with the row
        message: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local storage errors (database file, cache file)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Credential lookup or storage errors
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl LampstandError {
    /// Returns true when the error means the store could not be reached
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// Returns the typed error inside an `anyhow::Error`, if there is one
///
/// # Examples
///
/// ```
/// use lampstand::error::{kind_of, LampstandError};
///
/// let err: anyhow::Error = LampstandError::SessionNotFound("abc".into()).into();
/// assert!(matches!(kind_of(&err), Some(LampstandError::SessionNotFound(_))));
/// ```
pub fn kind_of(err: &anyhow::Error) -> Option<&LampstandError> {
    err.downcast_ref::<LampstandError>()
}

/// Result type alias for Lampstand operations
///
/// Uses `anyhow::Error` as the error type so context can be attached
/// while the typed [`LampstandError`] stays recoverable.
pub type Result<T> = anyhow::Result<T>;
