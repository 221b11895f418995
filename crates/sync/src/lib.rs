//! Passes that keep the local mirror in step with the remote.
//!
//! [`reconcile`] pulls one snapshot of the remote tree into the catalog and
//! blob storage. [`collect`] later removes what reconciliation marked
//! obsolete, once the deletion delay has passed. Both work from a
//! [`Context`] and are safe to rerun after a failure: a reconciliation pass
//! commits all or nothing, and collection only drops rows whose blobs are
//! gone. [`collect_orphans`] reclaims blobs that no row refers to.

mod context;
pub mod error;
mod formats;
mod gc;
mod reconcile;
#[cfg(test)]
mod testing;

pub use crate::context::Context;
pub use crate::formats::{FormatNegotiator, Preferences, parse_preferences};
pub use crate::gc::{CollectStats, collect, collect_orphans, orphaned_blobs};
pub use crate::reconcile::{ReconcileStats, reconcile, reconcile_at};
