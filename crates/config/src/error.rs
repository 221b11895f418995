//! Configuration Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The file extension doesn't map to a format we can read.
    #[display("unsupported configuration file format: {}", _0.display())]
    UnsupportedFormat(#[error(not(source))] PathBuf),
    #[display("invalid configuration")]
    Invalid,
    #[display("missing configuration value: {_0}")]
    Missing(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Configuration problems need an operator; retrying never helps.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
