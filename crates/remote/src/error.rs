//! Remote Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A remote provider error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Network, auth or quota failure, surfaced after the provider's own
    /// retries ran out.
    #[display("transport error: {_0}")]
    Transport(#[error(not(source))] String),
    /// The remote has no file with this id.
    #[display("remote file not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The file exists but its content can't be fetched in the requested way
    /// (download of an exportable file, export of a regular file, ...).
    #[display("unsupported content request: {_0}")]
    Unsupported(#[error(not(source))] String),
    /// A snapshot that can't be a tree: unknown parent, duplicate id, or a
    /// root that isn't a directory.
    #[display("invalid remote tree: {_0}")]
    InvalidTree(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
