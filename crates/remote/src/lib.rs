//! Remote tree model for the data lake mirror.
//!
//! The mirror pulls a full snapshot of the remote store on every pass. This
//! crate defines what a snapshot looks like ([`RemoteTree`] of
//! [`RemoteNode`]s), what the remote can convert documents to
//! ([`ExportFormat`]), and the [`RemoteProvider`] contract a transport
//! implements.

pub mod error;
mod format;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod node;
mod provider;
mod tree;

pub use crate::format::ExportFormat;
pub use crate::node::{DIRECTORY_MIME_TYPE, EXPORTABLE_MIME_PREFIX, NodeKind, NodeMeta, RemoteContent, RemoteNode};
pub use crate::provider::{ProviderHandle, RemoteProvider, SupportedFormats};
pub use crate::tree::RemoteTree;
