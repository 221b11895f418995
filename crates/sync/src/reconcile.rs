//! Reconciliation: bring the catalog in line with one remote snapshot.
//!
//! A pass reads the whole remote tree, compares it id by id against the
//! live part of the catalog and applies the difference in one transaction.
//! Content is fetched into blob storage before the transaction commits; if a
//! fetch fails the pass is abandoned and the catalog stays as it was. Blobs
//! written by an abandoned pass are unreferenced and show up in
//! [`orphaned_blobs`](crate::orphaned_blobs).

use crate::context::Context;
use crate::error::{ErrorKind, Result};
use crate::formats::FormatNegotiator;
use exn::ResultExt;
use lake_catalog::Session;
use lake_catalog::models::{ExportedVersion, LocalFile, LocalKind, Revision, truncate_to_micros};
use lake_remote::{ExportFormat, NodeMeta, RemoteContent, RemoteNode};
use std::collections::BTreeSet;
use std::path::Path;
use time::UtcDateTime;
use tracing::instrument;

/// What a reconciliation pass did, counted per file unless noted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Ids seen for the first time.
    pub created: usize,
    /// Obsolete ids that showed up again.
    pub resurrected: usize,
    pub content_changed: usize,
    /// Metadata changed, content didn't.
    pub metadata_changed: usize,
    pub unchanged: usize,
    /// Ids missing from the snapshot, now obsolete.
    pub removed: usize,
    /// Blobs downloaded.
    pub downloaded: usize,
    /// Blobs exported, one per format.
    pub exported: usize,
    /// New heads whose content wasn't fetched: not downloadable, nothing
    /// to export, or already stored.
    pub skipped: usize,
}

impl ReconcileStats {
    /// `true` if the pass left the catalog exactly as it found it.
    pub fn is_noop(&self) -> bool {
        self.created == 0
            && self.resurrected == 0
            && self.content_changed == 0
            && self.metadata_changed == 0
            && self.removed == 0
    }
}

/// Run a reconciliation pass, timestamping obsolescence with the current time.
pub async fn reconcile(ctx: &Context) -> Result<ReconcileStats> {
    reconcile_at(ctx, UtcDateTime::now()).await
}

/// Run a reconciliation pass with `now` as the obsolescence timestamp for
/// everything the pass retires or supersedes.
#[instrument("reconciliation pass", skip(ctx))]
pub async fn reconcile_at(ctx: &Context, now: UtcDateTime) -> Result<ReconcileStats> {
    let now = truncate_to_micros(now);
    let supported = ctx.remote.supported_export_formats().await.or_raise(|| ErrorKind::Transport)?;
    let negotiator = FormatNegotiator::new(&supported, &ctx.preferences);
    let tree = ctx.remote.get_tree().await.or_raise(|| ErrorKind::Transport)?;
    let nodes = tree.flatten();
    tracing::info!(root = tree.root_id(), files = nodes.len(), "Fetched remote snapshot");

    let session = ctx.catalog().begin().await.or_raise(|| ErrorKind::Catalog)?;
    let mut pass = Pass { ctx, negotiator, session, now, root_id: tree.root_id(), stats: ReconcileStats::default() };
    let mut local = pass.session.live_files().await.or_raise(|| ErrorKind::Catalog)?;
    pass.session.release_root_except(tree.root_id()).await.or_raise(|| ErrorKind::Catalog)?;
    for node in nodes {
        let existing = local.remove(node.id());
        pass.sync(node, existing).await?;
    }

    // Whatever is left was live locally but is gone from the remote.
    let mut removed: Vec<LocalFile> = local.into_values().collect();
    removed.sort_by(|a, b| a.meta.id.cmp(&b.meta.id));
    for file in &removed {
        pass.session.retire(file, now).await.or_raise(|| ErrorKind::Catalog)?;
        tracing::info!(id = file.id(), name = %file.meta.name, "File deleted on remote, marked obsolete");
    }
    pass.stats.removed = removed.len();

    let Pass { session, stats, .. } = pass;
    session.commit().await.or_raise(|| ErrorKind::Catalog)?;
    tracing::info!(?stats, "Reconciliation committed");
    Ok(stats)
}

/// What syncing one file's content did.
#[derive(Debug, Default)]
struct Outcome {
    content: bool,
    /// Head fields refreshed without a content change.
    metadata: usize,
}

struct Pass<'a> {
    ctx: &'a Context,
    negotiator: FormatNegotiator,
    session: Session,
    now: UtcDateTime,
    root_id: &'a str,
    stats: ReconcileStats,
}

impl Pass<'_> {
    async fn sync(&mut self, node: &RemoteNode, existing: Option<LocalFile>) -> Result<()> {
        let file = match existing {
            Some(file) => file,
            // Not reachable locally, but the row may still be waiting for
            // collection.
            None => match self.session.file(node.id()).await.or_raise(|| ErrorKind::Catalog)? {
                Some(file) => file,
                None => return self.create(node).await,
            },
        };
        if file.node_kind() != node.kind() {
            tracing::error!(id = node.id(), local = %file.node_kind(), remote = %node.kind(), "File changed kind");
            exn::bail!(ErrorKind::Integrity(format!(
                "{} changed from {} to {}",
                node.id(),
                file.node_kind(),
                node.kind()
            )));
        }
        self.update(node, file).await
    }

    async fn create(&mut self, node: &RemoteNode) -> Result<()> {
        let meta = normalized(&node.meta);
        tracing::info!(id = node.id(), name = %meta.name, kind = %node.kind(), "New file");
        match &node.content {
            RemoteContent::Directory => {
                let is_root = node.id() == self.root_id;
                let file = LocalFile { meta, kind: LocalKind::Directory { is_root }, obsolete_since: None };
                self.session.insert_file(&file).await.or_raise(|| ErrorKind::Catalog)?;
            },
            RemoteContent::Regular { revision_id, size, content_hash, can_download } => {
                let revision = new_revision(&meta, revision_id, *size, content_hash.clone(), *can_download);
                let kind = LocalKind::Regular { head_revision_id: revision_id.clone() };
                let file = LocalFile { meta, kind, obsolete_since: None };
                self.session.insert_file(&file).await.or_raise(|| ErrorKind::Catalog)?;
                self.session.insert_revision(&revision).await.or_raise(|| ErrorKind::Catalog)?;
                self.fetch_revision(&revision).await?;
            },
            RemoteContent::Exportable { can_export } => {
                let formats = self.negotiator.formats_for(&meta.mime_type).to_vec();
                let version = new_version(&meta, *can_export, &formats);
                let kind = LocalKind::Exportable { head_version: version.modified_time };
                let file = LocalFile { meta, kind, obsolete_since: None };
                self.session.insert_file(&file).await.or_raise(|| ErrorKind::Catalog)?;
                self.session.insert_version(&version).await.or_raise(|| ErrorKind::Catalog)?;
                self.export_version(&version, &formats).await?;
            },
        }
        self.stats.created += 1;
        Ok(())
    }

    async fn update(&mut self, node: &RemoteNode, mut file: LocalFile) -> Result<()> {
        let resurrected = file.obsolete_since.take().is_some();
        if resurrected {
            tracing::info!(id = node.id(), name = %node.meta.name, "Previously removed file has reappeared");
        }
        let meta = normalized(&node.meta);
        let outcome = match &node.content {
            RemoteContent::Directory => Outcome::default(),
            RemoteContent::Regular { .. } => self.sync_revision(node, &meta, &mut file).await?,
            RemoteContent::Exportable { can_export } => self.sync_version(&meta, *can_export, &mut file).await?,
        };
        let metadata = outcome.metadata + copy_metadata(&meta, node.id() == self.root_id, &mut file);
        if resurrected || outcome.content || metadata > 0 {
            self.session.update_file(&file).await.or_raise(|| ErrorKind::Catalog)?;
        }

        if resurrected {
            self.stats.resurrected += 1;
        }
        if outcome.content {
            tracing::info!(id = node.id(), name = %meta.name, "File content changed");
            self.stats.content_changed += 1;
        } else if metadata > 0 {
            tracing::info!(
                id = node.id(),
                name = %meta.name,
                changes = metadata,
                "File metadata changed, content unchanged"
            );
            self.stats.metadata_changed += 1;
        } else if !resurrected {
            tracing::debug!(id = node.id(), "No changes in file");
            self.stats.unchanged += 1;
        }
        Ok(())
    }

    async fn sync_revision(&mut self, node: &RemoteNode, meta: &NodeMeta, file: &mut LocalFile) -> Result<Outcome> {
        let RemoteContent::Regular { revision_id, size, content_hash, can_download } = &node.content else {
            return Ok(Outcome::default());
        };
        let head = match file.head_revision_id() {
            Some(head_id) => self.session.revision(file.id(), head_id).await.or_raise(|| ErrorKind::Catalog)?,
            None => None,
        };
        let wanted = new_revision(meta, revision_id, *size, content_hash.clone(), *can_download);
        let changed = head
            .as_ref()
            .is_none_or(|head| head.revision_id != wanted.revision_id || head.can_download != wanted.can_download);
        if !changed && let Some(head) = &head {
            // The hash is part of the blob name; only a new revision changes it.
            let refreshed = Revision { content_hash: head.content_hash.clone(), ..wanted };
            let metadata = revision_changes(head, &refreshed);
            if metadata > 0 {
                self.session.update_revision(&refreshed).await.or_raise(|| ErrorKind::Catalog)?;
            }
            return Ok(Outcome { content: false, metadata });
        }

        match &head {
            // A head that is already obsolete keeps its original timestamp.
            Some(head) if head.revision_id != wanted.revision_id && head.is_live() => {
                self.session
                    .set_revision_obsolete(file.id(), &head.revision_id, Some(self.now))
                    .await
                    .or_raise(|| ErrorKind::Catalog)?;
                tracing::info!(id = file.id(), revision = %head.revision_id, "Old revision marked obsolete");
            },
            Some(_) => {},
            None => tracing::warn!(id = file.id(), "Head revision is missing, fetching it again"),
        }
        match self.session.revision(file.id(), &wanted.revision_id).await.or_raise(|| ErrorKind::Catalog)? {
            Some(_) => self.session.update_revision(&wanted).await.or_raise(|| ErrorKind::Catalog)?,
            None => self.session.insert_revision(&wanted).await.or_raise(|| ErrorKind::Catalog)?,
        }
        file.kind = LocalKind::Regular { head_revision_id: wanted.revision_id.clone() };
        self.fetch_revision(&wanted).await?;
        Ok(Outcome { content: true, metadata: 0 })
    }

    async fn sync_version(&mut self, meta: &NodeMeta, can_export: bool, file: &mut LocalFile) -> Result<Outcome> {
        let head = match file.head_version() {
            Some(head_time) => self.session.version(file.id(), head_time).await.or_raise(|| ErrorKind::Catalog)?,
            None => None,
        };
        let formats = self.negotiator.formats_for(&meta.mime_type).to_vec();
        let wanted = new_version(meta, can_export, &formats);
        let changed = head.as_ref().is_none_or(|head| {
            wanted.modified_time > file.meta.modified_time
                || head.can_export != wanted.can_export
                || head.extensions != wanted.extensions
        });
        if !changed && let Some(head) = &head {
            let refreshed = ExportedVersion { modified_time: head.modified_time, ..wanted };
            let metadata = version_changes(head, &refreshed);
            if metadata > 0 {
                self.session.update_version(&refreshed).await.or_raise(|| ErrorKind::Catalog)?;
            }
            return Ok(Outcome { content: false, metadata });
        }

        match &head {
            Some(head) if head.modified_time != wanted.modified_time && head.is_live() => {
                self.session
                    .set_version_obsolete(file.id(), head.modified_time, Some(self.now))
                    .await
                    .or_raise(|| ErrorKind::Catalog)?;
                tracing::info!(id = file.id(), version = %head.modified_time, "Old exported version marked obsolete");
            },
            Some(_) => {},
            None => tracing::warn!(id = file.id(), "Head version is missing, exporting it again"),
        }
        match self.session.version(file.id(), wanted.modified_time).await.or_raise(|| ErrorKind::Catalog)? {
            Some(_) => self.session.update_version(&wanted).await.or_raise(|| ErrorKind::Catalog)?,
            None => self.session.insert_version(&wanted).await.or_raise(|| ErrorKind::Catalog)?,
        }
        file.kind = LocalKind::Exportable { head_version: wanted.modified_time };
        self.export_version(&wanted, &formats).await?;
        Ok(Outcome { content: true, metadata: 0 })
    }

    async fn fetch_revision(&mut self, revision: &Revision) -> Result<()> {
        if !revision.can_download {
            tracing::info!(id = %revision.file_id, "Skipping non-downloadable file");
            self.stats.skipped += 1;
            return Ok(());
        }
        let name = revision.blob_name();
        let path = Path::new(&name);
        if let Some(size) = revision.size
            && self.stored_size(path).await? == Some(size)
        {
            tracing::debug!(id = %revision.file_id, blob = %name, "Blob already stored, not downloading");
            self.stats.skipped += 1;
            return Ok(());
        }
        let data = self.ctx.remote.download(&revision.file_id).await.or_raise(|| ErrorKind::Transport)?;
        self.ctx.storage.write(path, &data).await.or_raise(|| ErrorKind::Storage)?;
        tracing::info!(id = %revision.file_id, blob = %name, bytes = data.len(), "Downloaded file");
        self.stats.downloaded += 1;
        Ok(())
    }

    async fn export_version(&mut self, version: &ExportedVersion, formats: &[ExportFormat]) -> Result<()> {
        if !version.can_export || formats.is_empty() {
            tracing::info!(id = %version.file_id, mime_type = %version.mime_type, "Skipping non-exportable file");
            self.stats.skipped += 1;
            return Ok(());
        }
        for format in formats {
            let name = version.blob_name(&format.extension);
            let data = self.ctx.remote.export(&version.file_id, format).await.or_raise(|| ErrorKind::Transport)?;
            self.ctx.storage.write(Path::new(&name), &data).await.or_raise(|| ErrorKind::Storage)?;
            tracing::info!(id = %version.file_id, blob = %name, format = %format, bytes = data.len(), "Exported file");
            self.stats.exported += 1;
        }
        Ok(())
    }

    async fn stored_size(&self, path: &Path) -> Result<Option<u64>> {
        if !self.ctx.storage.exists(path).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(None);
        }
        let info = self.ctx.storage.stat(path).await.or_raise(|| ErrorKind::Storage)?;
        Ok(Some(info.size))
    }
}

/// Remote metadata at the precision the catalog stores.
fn normalized(meta: &NodeMeta) -> NodeMeta {
    NodeMeta {
        created_time: truncate_to_micros(meta.created_time),
        modified_time: truncate_to_micros(meta.modified_time),
        ..meta.clone()
    }
}

fn new_revision(
    meta: &NodeMeta,
    revision_id: &str,
    size: Option<u64>,
    content_hash: Option<String>,
    can_download: bool,
) -> Revision {
    Revision {
        file_id: meta.id.clone(),
        revision_id: revision_id.to_string(),
        name: meta.name.clone(),
        mime_type: meta.mime_type.clone(),
        size,
        content_hash,
        can_download,
        modified_time: meta.modified_time,
        modified_by: meta.modified_by.clone(),
        obsolete_since: None,
    }
}

/// A version records only the extensions it will actually be exported in.
fn new_version(meta: &NodeMeta, can_export: bool, formats: &[ExportFormat]) -> ExportedVersion {
    let extensions: BTreeSet<String> =
        if can_export { formats.iter().map(|f| f.extension.clone()).collect() } else { BTreeSet::new() };
    ExportedVersion {
        file_id: meta.id.clone(),
        modified_time: meta.modified_time,
        name: meta.name.clone(),
        mime_type: meta.mime_type.clone(),
        modified_by: meta.modified_by.clone(),
        can_export,
        extensions,
        obsolete_since: None,
    }
}

fn assign<T: PartialEq + Clone>(slot: &mut T, value: &T) -> usize {
    if slot == value {
        return 0;
    }
    *slot = value.clone();
    1
}

/// Copy every mutable field from the remote, returning how many differed.
fn copy_metadata(meta: &NodeMeta, is_root: bool, file: &mut LocalFile) -> usize {
    let local = &mut file.meta;
    let mut changes = assign(&mut local.name, &meta.name)
        + assign(&mut local.mime_type, &meta.mime_type)
        + assign(&mut local.created_time, &meta.created_time)
        + assign(&mut local.modified_time, &meta.modified_time)
        + assign(&mut local.modified_by, &meta.modified_by)
        + assign(&mut local.web_url, &meta.web_url)
        + assign(&mut local.icon_url, &meta.icon_url)
        + assign(&mut local.parent_id, &meta.parent_id);
    if let LocalKind::Directory { is_root: flag } = &mut file.kind {
        changes += assign(flag, &is_root);
    }
    changes
}

fn revision_changes(old: &Revision, new: &Revision) -> usize {
    [
        old.name != new.name,
        old.mime_type != new.mime_type,
        old.size != new.size,
        old.modified_time != new.modified_time,
        old.modified_by != new.modified_by,
        old.obsolete_since != new.obsolete_since,
    ]
    .into_iter()
    .filter(|changed| *changed)
    .count()
}

fn version_changes(old: &ExportedVersion, new: &ExportedVersion) -> usize {
    [
        old.name != new.name,
        old.mime_type != new.mime_type,
        old.modified_by != new.modified_by,
        old.obsolete_since != new.obsolete_since,
    ]
    .into_iter()
    .filter(|changed| *changed)
    .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::parse_preferences;
    use crate::testing::{Harness, at, dir, doc, root, sample_tree, set_revision, text};
    use lake_catalog::ObsoleteKind;
    use lake_remote::RemoteTree;
    use std::path::PathBuf;
    use time::Duration;

    #[tokio::test]
    async fn test_first_pass_creates_everything() {
        let h = Harness::new(sample_tree()).await;
        let stats = reconcile_at(&h.ctx, at(0)).await.unwrap();
        assert_eq!(stats.created, 4);
        assert_eq!(stats.downloaded, 1);
        assert_eq!(stats.exported, 2);
        assert_eq!(h.blobs().await, ["doc_20231114_221320000000.pdf", "doc_20231114_221320000000.txt", "tx_r1_md5r1"]);

        let tree = h.repo().get_tree(None).await.unwrap().unwrap();
        assert_eq!(tree.root_id(), "root");
        assert!(tree.root().is_root());
        assert_eq!(tree.virtual_path("tx").unwrap(), PathBuf::from("d1/tx.txt"));
        let version = h.repo().head_version(tree.get("doc").unwrap()).await.unwrap().unwrap();
        assert_eq!(version.extensions, BTreeSet::from(["pdf".to_string(), "txt".to_string()]));
        h.assert_heads_live().await;
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        let stats = reconcile_at(&h.ctx, at(10)).await.unwrap();
        assert!(stats.is_noop());
        assert_eq!(stats.unchanged, 4);
        assert_eq!(stats.downloaded + stats.exported, 0);
        assert_eq!(h.remote.downloads().await, 1);
        assert_eq!(h.repo().revisions("tx").await.unwrap().len(), 1);
        assert_eq!(h.repo().versions("doc").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sub_microsecond_times_are_idempotent() {
        let h = Harness::new(sample_tree()).await;
        let precise = at(0) + Duration::nanoseconds(123_456_789);
        h.remote.modify("doc", |node| node.meta.modified_time = precise).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        let stats = reconcile_at(&h.ctx, at(10)).await.unwrap();
        assert!(stats.is_noop(), "{stats:?}");
    }

    #[tokio::test]
    async fn test_new_revision_supersedes_head() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote.modify("tx", |node| set_revision(node, "r2")).await;
        let stats = reconcile_at(&h.ctx, at(10)).await.unwrap();
        assert_eq!(stats.content_changed, 1);
        assert_eq!(stats.unchanged, 3);
        assert_eq!(stats.downloaded, 1);

        let tx = h.repo().get_file_by_id("tx", false).await.unwrap().unwrap();
        assert_eq!(tx.head_revision_id(), Some("r2"));
        let revisions = h.repo().revisions("tx").await.unwrap();
        let r1 = revisions.iter().find(|r| r.revision_id == "r1").unwrap();
        assert_eq!(r1.obsolete_since, Some(at(10)));
        assert!(h.blobs().await.contains(&"tx_r1_md5r1".to_string()));
        assert!(h.blobs().await.contains(&"tx_r2_md5r2".to_string()));
        h.assert_heads_live().await;
    }

    #[tokio::test]
    async fn test_reverting_revives_obsolete_revision() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote.modify("tx", |node| set_revision(node, "r2")).await;
        reconcile_at(&h.ctx, at(10)).await.unwrap();
        h.remote.modify("tx", |node| set_revision(node, "r1")).await;
        let stats = reconcile_at(&h.ctx, at(20)).await.unwrap();
        assert_eq!(stats.content_changed, 1);
        // r1's blob is still there, so nothing is fetched.
        assert_eq!(stats.downloaded, 0);
        assert_eq!(stats.skipped, 1);

        let revisions = h.repo().revisions("tx").await.unwrap();
        assert_eq!(revisions.len(), 2);
        for revision in revisions {
            match revision.revision_id.as_str() {
                "r1" => assert!(revision.is_live()),
                _ => assert_eq!(revision.obsolete_since, Some(at(20))),
            }
        }
        h.assert_heads_live().await;
    }

    #[tokio::test]
    async fn test_metadata_only_change() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote
            .modify("tx", |node| {
                node.meta.name = "renamed.txt".to_string();
                node.meta.modified_by = Some("Ada".to_string());
            })
            .await;
        let stats = reconcile_at(&h.ctx, at(10)).await.unwrap();
        assert_eq!(stats.metadata_changed, 1);
        assert_eq!(stats.content_changed + stats.downloaded, 0);
        let tx = h.repo().get_file_by_id("tx", false).await.unwrap().unwrap();
        assert_eq!(tx.meta.name, "renamed.txt");
        let head = h.repo().head_revision(&tx).await.unwrap().unwrap();
        assert_eq!(head.name, "renamed.txt");
        assert_eq!(head.modified_by.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_resurrection() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        let tx = h.remote.remove("tx").await.unwrap();
        let stats = reconcile_at(&h.ctx, at(10)).await.unwrap();
        assert_eq!(stats.removed, 1);
        let obsolete = h.repo().get_file_by_id("tx", true).await.unwrap().unwrap();
        assert_eq!(obsolete.obsolete_since, Some(at(10)));
        let head = h.repo().head_revision(&obsolete).await.unwrap().unwrap();
        assert_eq!(head.obsolete_since, Some(at(10)));

        h.remote.insert(tx).await.unwrap();
        let stats = reconcile_at(&h.ctx, at(20)).await.unwrap();
        assert_eq!(stats.resurrected, 1);
        assert_eq!(stats.created, 0);
        assert_eq!(stats.content_changed, 0);
        let tx = h.repo().get_file_by_id("tx", false).await.unwrap().unwrap();
        assert!(tx.is_live());
        let revisions = h.repo().revisions("tx").await.unwrap();
        assert_eq!(revisions.len(), 1);
        assert!(revisions[0].is_live());
        assert_eq!(h.remote.downloads().await, 1);
        h.assert_heads_live().await;
        assert!(reconcile_at(&h.ctx, at(30)).await.unwrap().is_noop());
    }

    #[tokio::test]
    async fn test_resurrection_with_new_content_keeps_old_obsolescence() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote.remove("tx").await.unwrap();
        let mut doc = h.remote.remove("doc").await.unwrap();
        reconcile_at(&h.ctx, at(10)).await.unwrap();

        h.remote.insert(text("tx", "d1", "r2")).await.unwrap();
        doc.meta.modified_time = at(60);
        h.remote.insert(doc).await.unwrap();
        let stats = reconcile_at(&h.ctx, at(20)).await.unwrap();
        assert_eq!(stats.resurrected, 2);
        assert_eq!(stats.content_changed, 2);

        let revisions = h.repo().revisions("tx").await.unwrap();
        assert_eq!(revisions.len(), 2);
        let r1 = revisions.iter().find(|r| r.revision_id == "r1").unwrap();
        assert_eq!(r1.obsolete_since, Some(at(10)));
        assert!(revisions.iter().find(|r| r.revision_id == "r2").unwrap().is_live());

        let versions = h.repo().versions("doc").await.unwrap();
        assert_eq!(versions.len(), 2);
        let old = versions.iter().find(|v| v.modified_time == at(0)).unwrap();
        assert_eq!(old.obsolete_since, Some(at(10)));
        assert!(versions.iter().find(|v| v.modified_time == at(60)).unwrap().is_live());
        h.assert_heads_live().await;
    }

    #[tokio::test]
    async fn test_resurrection_fetch_failure_aborts() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote.remove("tx").await.unwrap();
        reconcile_at(&h.ctx, at(10)).await.unwrap();

        h.remote.insert(text("tx", "d1", "r2")).await.unwrap();
        h.remote.fail_fetches("tx").await;
        let err = reconcile_at(&h.ctx, at(20)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Transport));
        let tx = h.repo().get_file_by_id("tx", true).await.unwrap().unwrap();
        assert_eq!(tx.obsolete_since, Some(at(10)));
        assert_eq!(tx.head_revision_id(), Some("r1"));
        assert_eq!(h.repo().revisions("tx").await.unwrap().len(), 1);
        assert!(!h.blobs().await.contains(&"tx_r2_md5r2".to_string()));

        h.remote.heal_fetches("tx").await;
        let stats = reconcile_at(&h.ctx, at(30)).await.unwrap();
        assert_eq!(stats.resurrected, 1);
        assert!(h.repo().get_file_by_id("tx", false).await.unwrap().unwrap().is_live());
    }

    #[tokio::test]
    async fn test_unreachable_remote_leaves_store_unchanged() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote.remove("d1").await.unwrap();
        h.remote.set_unreachable(true).await;
        let err = reconcile_at(&h.ctx, at(10)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Transport));
        assert!(err.is_retryable());
        assert_eq!(h.repo().get_tree(None).await.unwrap().unwrap().len(), 4);
        assert!(h.repo().get_obsolete(ObsoleteKind::Files, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_whole_pass() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote.modify("tx", |node| set_revision(node, "r2")).await;
        h.remote.insert(text("new", "root", "r1")).await.unwrap();
        h.remote.fail_fetches("new").await;
        let err = reconcile_at(&h.ctx, at(10)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Transport));

        let tx = h.repo().get_file_by_id("tx", false).await.unwrap().unwrap();
        assert_eq!(tx.head_revision_id(), Some("r1"));
        assert_eq!(h.repo().revisions("tx").await.unwrap().len(), 1);
        assert!(h.repo().get_file_by_id("new", true).await.unwrap().is_none());

        h.remote.heal_fetches("new").await;
        let stats = reconcile_at(&h.ctx, at(20)).await.unwrap();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.content_changed, 1);
    }

    #[tokio::test]
    async fn test_removed_directory_keeps_moved_child() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        let mut tree = RemoteTree::new(root()).unwrap();
        tree.insert(dir("d2", "root")).unwrap();
        tree.insert(text("tx", "d2", "r1")).unwrap();
        tree.insert(doc("doc", "root")).unwrap();
        h.remote.set_tree(tree).await;

        let stats = reconcile_at(&h.ctx, at(10)).await.unwrap();
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.metadata_changed, 1);
        let obsolete = h.repo().get_obsolete(ObsoleteKind::Files, None).await.unwrap();
        assert_eq!(obsolete.len(), 1);
        let tree = h.repo().get_tree(None).await.unwrap().unwrap();
        assert!(tree.get("d1").is_none());
        assert_eq!(tree.virtual_path("tx").unwrap(), PathBuf::from("d2/tx.txt"));
        assert!(tree.get("doc").unwrap().is_live());
        h.assert_heads_live().await;
    }

    #[tokio::test]
    async fn test_removed_subtree_shares_one_timestamp() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote.remove("d1").await.unwrap();
        let stats = reconcile_at(&h.ctx, at(10)).await.unwrap();
        assert_eq!(stats.removed, 2);
        for id in ["d1", "tx"] {
            let file = h.repo().get_file_by_id(id, true).await.unwrap().unwrap();
            assert_eq!(file.obsolete_since, Some(at(10)));
        }
        assert!(h.repo().get_file_by_id("doc", false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_edited_document_gets_new_version() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote.modify("doc", |node| node.meta.modified_time = at(60)).await;
        let stats = reconcile_at(&h.ctx, at(100)).await.unwrap();
        assert_eq!(stats.content_changed, 1);
        assert_eq!(stats.exported, 2);

        let versions = h.repo().versions("doc").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].obsolete_since, Some(at(100)));
        assert!(versions[1].is_live());
        let doc = h.repo().get_file_by_id("doc", false).await.unwrap().unwrap();
        assert_eq!(doc.head_version(), Some(at(60)));
        h.assert_heads_live().await;
    }

    #[tokio::test]
    async fn test_preference_change_reexports_in_place() {
        let mut h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.ctx.preferences = parse_preferences("document: pdf");
        let stats = reconcile_at(&h.ctx, at(10)).await.unwrap();
        assert_eq!(stats.content_changed, 1);
        assert_eq!(stats.exported, 1);

        let versions = h.repo().versions("doc").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert!(versions[0].is_live());
        assert_eq!(versions[0].modified_time, at(0));
        assert_eq!(versions[0].extensions.iter().map(String::as_str).collect::<Vec<_>>(), ["pdf"]);
        h.assert_heads_live().await;
        assert!(reconcile_at(&h.ctx, at(20)).await.unwrap().is_noop());
    }

    #[tokio::test]
    async fn test_export_permission_change_updates_head_in_place() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote
            .modify("doc", |node| node.content = RemoteContent::Exportable { can_export: false })
            .await;
        let stats = reconcile_at(&h.ctx, at(10)).await.unwrap();
        assert_eq!(stats.content_changed, 1);
        assert_eq!(stats.skipped, 1);
        let versions = h.repo().versions("doc").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert!(versions[0].is_live());
        assert!(versions[0].extensions.is_empty());
        assert!(reconcile_at(&h.ctx, at(20)).await.unwrap().is_noop());

        h.remote.modify("doc", |node| node.content = RemoteContent::Exportable { can_export: true }).await;
        let stats = reconcile_at(&h.ctx, at(30)).await.unwrap();
        assert_eq!(stats.content_changed, 1);
        assert_eq!(stats.exported, 2);
    }

    #[tokio::test]
    async fn test_download_permission_change_refetches() {
        let h = Harness::new(sample_tree()).await;
        h.remote
            .modify("tx", |node| {
                if let RemoteContent::Regular { can_download, .. } = &mut node.content {
                    *can_download = false;
                }
            })
            .await;
        let stats = reconcile_at(&h.ctx, at(0)).await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.downloaded, 0);

        h.remote.modify("tx", |node| set_revision(node, "r1")).await;
        let stats = reconcile_at(&h.ctx, at(10)).await.unwrap();
        assert_eq!(stats.content_changed, 1);
        assert_eq!(stats.downloaded, 1);
        let revisions = h.repo().revisions("tx").await.unwrap();
        assert_eq!(revisions.len(), 1);
        assert!(revisions[0].can_download);
    }

    #[tokio::test]
    async fn test_kind_change_is_an_integrity_error() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote.remove("tx").await.unwrap();
        h.remote.insert(doc("tx", "d1")).await.unwrap();
        let err = reconcile_at(&h.ctx, at(10)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Integrity(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_root_moves_to_sub_tree() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        let mut tree = RemoteTree::new(dir("d1", "root")).unwrap();
        tree.insert(text("tx", "d1", "r1")).unwrap();
        h.remote.set_tree(tree).await;

        let stats = reconcile_at(&h.ctx, at(10)).await.unwrap();
        assert_eq!(stats.removed, 2);
        let tree = h.repo().get_tree(None).await.unwrap().unwrap();
        assert_eq!(tree.root_id(), "d1");
        assert!(tree.root().is_root());
        assert!(tree.root().meta.parent_id.is_none());
        assert_eq!(tree.len(), 2);
        let old_root = h.repo().get_file_by_id("root", true).await.unwrap().unwrap();
        assert!(!old_root.is_root());
        assert!(!old_root.is_live());
    }
}
