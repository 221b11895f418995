//! Versioned local store of the data lake mirror.
//!
//! One row per remote file ever seen, plus the revisions (regular files) and
//! exported versions (documents) whose bytes sit in blob storage. Rows are
//! never deleted by a reconciliation pass, only flagged obsolete; collection
//! removes them later, children before parents.

mod db;
pub mod error;
pub mod models;
mod repo;

pub use crate::db::{Database, SCHEMA_VERSION};
pub use crate::repo::{Obsolete, ObsoleteKind, Repository, Session};
