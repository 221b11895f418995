//! Blob storage for the data lake mirror.
//!
//! Every revision and exported version in the catalog is backed by one or
//! more blobs. This crate stores those bytes; it knows nothing about the
//! catalog that references them.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::BlobInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
