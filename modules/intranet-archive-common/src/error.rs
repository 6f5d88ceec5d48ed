//! Error taxonomy shared by the capture pipeline and the access gateway.

use thiserror::Error;

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Unknown environment, agency or host. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Bad, missing, expired or mismatched access grant. Never retried.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Object storage or network failure during publish.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The capture exceeded its time budget; nothing was published.
    #[error("Capture timed out: {0}")]
    Timeout(String),

    /// The capture ended without a complete mirror; nothing was published.
    #[error("Capture incomplete: {0}")]
    CaptureIncomplete(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limit exceeded")]
    RateLimited,
}

impl ArchiveError {
    /// Whether a retry can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ArchiveError::Storage(_) | ArchiveError::Io(_))
    }

    /// HTTP status for errors that reach the request boundary. Internal
    /// failures collapse to 500 so their messages are never surfaced.
    pub fn status_code(&self) -> u16 {
        match self {
            ArchiveError::Validation(_) => 400,
            ArchiveError::Auth(e) if e.is_forbidden() => 403,
            ArchiveError::Auth(_) => 400,
            ArchiveError::RateLimited => 429,
            _ => 500,
        }
    }
}

/// Reasons a grant-access request is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("signature or payload missing")]
    Missing,

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("grant expired at {0}")]
    Expired(i64),

    #[error("hostname does not match a known environment: {0}")]
    UnknownHost(String),

    #[error("agency not allowed: {0}")]
    AgencyNotAllowed(String),

    #[error("signature mismatch")]
    SignatureMismatch,
}

impl AuthError {
    /// A well-formed request whose signature is wrong is forbidden (403);
    /// everything else is a bad request (400).
    pub fn is_forbidden(&self) -> bool {
        matches!(self, AuthError::SignatureMismatch)
    }
}
