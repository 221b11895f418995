//! Fixtures shared by the pass tests.

use crate::context::Context;
use crate::formats::parse_preferences;
use lake_catalog::models::LocalKind;
use lake_catalog::{Database, Repository};
use lake_remote::mock::MockRemote;
use lake_remote::{DIRECTORY_MIME_TYPE, NodeMeta, RemoteContent, RemoteNode, RemoteTree};
use lake_storage::backend::MockBackend;
use std::sync::Arc;
use time::{Duration, UtcDateTime};

const T0: i64 = 1_700_000_000;

/// `secs` after 2023-11-14 22:13:20 UTC.
pub(crate) fn at(secs: i64) -> UtcDateTime {
    UtcDateTime::from_unix_timestamp(T0 + secs).unwrap()
}

pub(crate) fn root() -> RemoteNode {
    RemoteNode::directory(NodeMeta::new("root", "root", DIRECTORY_MIME_TYPE, at(0)))
}

pub(crate) fn dir(id: &str, parent: &str) -> RemoteNode {
    RemoteNode::directory(NodeMeta::new(id, id, DIRECTORY_MIME_TYPE, at(0)).with_parent(parent))
}

/// A text file whose size matches the bytes the mock remote serves for it.
pub(crate) fn text(id: &str, parent: &str, revision: &str) -> RemoteNode {
    let meta = NodeMeta::new(id, format!("{id}.txt"), "text/plain", at(0)).with_parent(parent);
    RemoteNode::regular(meta, revision, served_size(id, revision), format!("md5{revision}"))
}

pub(crate) fn doc(id: &str, parent: &str) -> RemoteNode {
    RemoteNode::exportable(NodeMeta::new(id, id, "application/vnd.google-apps.document", at(0)).with_parent(parent))
}

/// Move a text file to `revision`, downloadable.
pub(crate) fn set_revision(node: &mut RemoteNode, revision: &str) {
    let size = served_size(&node.meta.id, revision);
    node.content = RemoteContent::Regular {
        revision_id: revision.to_string(),
        size: Some(size),
        content_hash: Some(format!("md5{revision}")),
        can_download: true,
    };
}

fn served_size(id: &str, revision: &str) -> u64 {
    format!("{id}@{revision}").len() as u64
}

/// `root/d1/tx.txt` plus the document `root/doc`.
pub(crate) fn sample_tree() -> RemoteTree {
    let mut tree = RemoteTree::new(root()).unwrap();
    tree.insert(dir("d1", "root")).unwrap();
    tree.insert(text("tx", "d1", "r1")).unwrap();
    tree.insert(doc("doc", "root")).unwrap();
    tree
}

pub(crate) struct Harness {
    pub remote: Arc<MockRemote>,
    pub storage: Arc<MockBackend>,
    pub ctx: Context,
}

impl Harness {
    /// Documents export to pdf and txt; obsolete content is kept for an hour.
    pub async fn new(tree: RemoteTree) -> Self {
        let remote = Arc::new(MockRemote::new(tree));
        let storage = Arc::new(MockBackend::default());
        let database = Database::connect_in_memory().await.unwrap();
        let ctx = Context::new(remote.clone(), storage.clone(), database)
            .with_preferences(parse_preferences("document: pdf,txt\nspreadsheet: csv"))
            .with_deletion_delay(Duration::hours(1));
        Self { remote, storage, ctx }
    }

    pub fn repo(&self) -> Repository {
        self.ctx.catalog()
    }

    pub async fn blobs(&self) -> Vec<String> {
        self.storage.paths().await.iter().map(|p| p.to_string_lossy().into_owned()).collect()
    }

    /// Every live file's head row exists and is live.
    pub async fn assert_heads_live(&self) {
        let repo = self.repo();
        let Some(tree) = repo.get_tree(None).await.unwrap() else {
            return;
        };
        for file in tree.flatten() {
            match file.kind {
                LocalKind::Directory { .. } => {},
                LocalKind::Regular { .. } => {
                    let head = repo.head_revision(file).await.unwrap();
                    assert!(head.is_some_and(|r| r.is_live()), "{} has no live head revision", file.id());
                },
                LocalKind::Exportable { .. } => {
                    let head = repo.head_version(file).await.unwrap();
                    assert!(head.is_some_and(|v| v.is_live()), "{} has no live head version", file.id());
                },
            }
        }
    }
}
