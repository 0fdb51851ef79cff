//! GridPulse error taxonomy.
//!
//! Every failure the dispatch core can surface maps onto one of these
//! variants; the gateway translates them to HTTP statuses. The
//! retryable/permanent split is explicit so callers can tell a transient
//! upstream hiccup from a malformed request without parsing messages.

use thiserror::Error;

/// Result alias used across GridPulse crates.
pub type Result<T> = std::result::Result<T, GridPulseError>;

#[derive(Error, Debug)]
pub enum GridPulseError {
    /// Missing or malformed request parameters — the caller's fault.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown task, provider, or capability.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested state transition is not allowed (e.g. executing a
    /// completed task, cancelling a terminal one).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A provider dependency is not configured or not reachable.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// No API key configured for a provider that requires one.
    #[error("no API key configured for provider '{0}'")]
    ApiKeyMissing(String),

    /// Upstream HTTP failure (connection refused, 5xx, timeout).
    #[error("http error: {0}")]
    Http(String),

    /// A capability handler failed while executing.
    #[error("execution error: {0}")]
    Execution(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GridPulseError {
    /// Whether retrying the same operation later could succeed.
    ///
    /// Upstream transport failures and unavailable providers are transient;
    /// validation, lookup, and transition errors are permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Unavailable(_))
    }

    /// Prefix used when persisting this error into a task row, so the
    /// stored string keeps the retryable/permanent distinction.
    pub fn stored_message(&self) -> String {
        if self.is_retryable() {
            format!("retryable: {self}")
        } else {
            format!("permanent: {self}")
        }
    }
}
