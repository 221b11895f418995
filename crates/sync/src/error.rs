//! Sync Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. The crates below this one raise their own kinds; they
//! end up as children of the kinds here.

use derive_more::{Display, Error};

/// A sync error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The remote couldn't produce a snapshot or a file's content.
    #[display("remote transport error")]
    Transport,
    /// Local state contradicts itself or the remote in a way that can't be
    /// repaired automatically.
    #[display("integrity violation: {_0}")]
    Integrity(#[error(not(source))] String),
    #[display("blob storage error")]
    Storage,
    #[display("catalog error")]
    Catalog,
    #[display("invalid configuration")]
    Config,
}

impl ErrorKind {
    /// Returns `true` if running the pass again later might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport | Self::Storage | Self::Catalog => true,
            Self::Integrity(_) | Self::Config => false,
        }
    }
}
