//! Collection of obsolete content.
//!
//! Revisions and versions that have been obsolete for longer than the
//! deletion delay lose their blobs and then their rows. Files go last, and
//! only once nothing refers to them. A blob that can't be deleted keeps its
//! row so the next pass tries again; a blob that is already gone doesn't.
//!
//! Blobs no row refers to at all are handled separately by
//! [`collect_orphans`], on the same delay measured from their last write.

use crate::context::Context;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use lake_catalog::Repository;
use lake_storage::backend::ReadOnlyBackend;
use lake_storage::{BackendHandle, BlobInfo};
use std::path::Path;
use std::sync::Arc;
use time::{Duration, UtcDateTime};
use tracing::instrument;

/// What a collection pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectStats {
    /// Revision rows deleted.
    pub revisions: usize,
    /// Exported version rows deleted.
    pub versions: usize,
    /// File rows deleted.
    pub files: usize,
    pub blobs_deleted: usize,
    /// Blobs that were already gone; their rows are deleted anyway.
    pub blobs_missing: usize,
    /// Blobs that couldn't be deleted; their rows are kept.
    pub blob_failures: usize,
}

/// Collect everything that became obsolete at least `delay` before `now`.
///
/// With `dry_run` the pass runs against a read-only view of blob storage and
/// its catalog changes are rolled back; the returned stats say what would
/// have been removed.
#[instrument("collection pass", skip(ctx))]
pub async fn collect(ctx: &Context, now: UtcDateTime, delay: Duration, dry_run: bool) -> Result<CollectStats> {
    let Some(cutoff) = cutoff(now, delay) else {
        return Ok(CollectStats::default());
    };
    let storage = target(ctx, dry_run);
    let mut session = ctx.catalog().begin().await.or_raise(|| ErrorKind::Catalog)?;
    let mut stats = CollectStats::default();

    for revision in session.collectable_revisions(cutoff).await.or_raise(|| ErrorKind::Catalog)? {
        if !delete_blob(&storage, &revision.blob_name(), &mut stats).await {
            continue;
        }
        session.delete_revision(&revision).await.or_raise(|| ErrorKind::Catalog)?;
        tracing::debug!(id = %revision.file_id, revision = %revision.revision_id, "Revision collected");
        stats.revisions += 1;
    }

    for version in session.collectable_versions(cutoff).await.or_raise(|| ErrorKind::Catalog)? {
        let mut cleared = true;
        for name in version.blob_names() {
            cleared &= delete_blob(&storage, &name, &mut stats).await;
        }
        if !cleared {
            continue;
        }
        session.delete_version(&version).await.or_raise(|| ErrorKind::Catalog)?;
        tracing::debug!(id = %version.file_id, version = %version.modified_time, "Exported version collected");
        stats.versions += 1;
    }

    let files = session.delete_collectable_files(cutoff).await.or_raise(|| ErrorKind::Catalog)?;
    for id in &files {
        tracing::debug!(id = %id, "File collected");
    }
    stats.files = files.len();

    if dry_run {
        session.rollback().await.or_raise(|| ErrorKind::Catalog)?;
        tracing::info!(?stats, "Collection dry run finished, nothing deleted");
    } else {
        session.commit().await.or_raise(|| ErrorKind::Catalog)?;
        tracing::info!(?stats, "Collection committed");
    }
    Ok(stats)
}

/// Delete unreferenced blobs last written at least `delay` before `now`.
///
/// Only the blob counters of the returned stats are used. Like [`collect`],
/// `dry_run` leaves storage untouched.
#[instrument("orphan collection", skip(ctx))]
pub async fn collect_orphans(ctx: &Context, now: UtcDateTime, delay: Duration, dry_run: bool) -> Result<CollectStats> {
    let Some(cutoff) = cutoff(now, delay) else {
        return Ok(CollectStats::default());
    };
    let storage = target(ctx, dry_run);
    let mut stats = CollectStats::default();
    for blob in orphaned_blobs(&ctx.catalog(), &ctx.storage).await? {
        if blob.modified > cutoff {
            tracing::debug!(blob = %blob.path.display(), "Unreferenced blob is too recent to collect");
            continue;
        }
        delete_blob(&storage, &blob.path.to_string_lossy(), &mut stats).await;
    }
    tracing::info!(?stats, dry_run, "Orphan collection finished");
    Ok(stats)
}

fn cutoff(now: UtcDateTime, delay: Duration) -> Option<UtcDateTime> {
    let cutoff = now.checked_sub(delay);
    if cutoff.is_none() {
        tracing::warn!(%delay, "Deletion delay reaches past the earliest representable time, nothing to collect");
    }
    cutoff
}

fn target(ctx: &Context, dry_run: bool) -> BackendHandle {
    if dry_run { Arc::new(ReadOnlyBackend::new(ctx.storage.clone())) } else { ctx.storage.clone() }
}

/// Returns `false` if the blob is still stored.
async fn delete_blob(storage: &BackendHandle, name: &str, stats: &mut CollectStats) -> bool {
    match storage.delete(Path::new(name)).await {
        Ok(()) => stats.blobs_deleted += 1,
        Err(err) if err.is_not_found() => {
            tracing::warn!(blob = %name, "Blob already missing");
            stats.blobs_missing += 1;
        },
        Err(err) => {
            tracing::error!(blob = %name, error = ?err, "Failed to delete blob");
            stats.blob_failures += 1;
            return false;
        },
    }
    true
}

/// Stored blobs no catalog row refers to.
///
/// These are left behind by passes that fetched content and then failed, or
/// by exported versions whose format set shrank.
pub async fn orphaned_blobs(repo: &Repository, storage: &BackendHandle) -> Result<Vec<BlobInfo>> {
    let referenced = repo.blob_names().await.or_raise(|| ErrorKind::Catalog)?;
    let mut orphans = storage.list(None).await.or_raise(|| ErrorKind::Storage)?;
    orphans.retain(|info| !referenced.contains(info.path.to_string_lossy().as_ref()));
    if !orphans.is_empty() {
        tracing::info!(count = orphans.len(), backend = storage.name(), "Found unreferenced blobs");
    }
    Ok(orphans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::reconcile_at;
    use crate::formats::parse_preferences;
    use crate::testing::{Harness, at, sample_tree, set_revision};
    use lake_storage::StorageBackend;
    use rstest::rstest;

    /// r1 is superseded by r2 at `at(10)`.
    async fn superseded() -> Harness {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote.modify("tx", |node| set_revision(node, "r2")).await;
        reconcile_at(&h.ctx, at(10)).await.unwrap();
        h
    }

    #[rstest]
    #[case::before_delay(-1, 0)]
    #[case::at_delay(0, 1)]
    #[case::after_delay(1, 1)]
    #[tokio::test]
    async fn test_deletion_delay(#[case] offset: i64, #[case] collected: usize) {
        let h = superseded().await;
        let delay = h.ctx.deletion_delay;
        let now = at(10) + delay + Duration::seconds(offset);
        let stats = collect(&h.ctx, now, delay, false).await.unwrap();
        assert_eq!(stats.revisions, collected);
        assert_eq!(stats.blobs_deleted, collected);
        assert_eq!(h.blobs().await.contains(&"tx_r1_md5r1".to_string()), collected == 0);
        assert!(h.blobs().await.contains(&"tx_r2_md5r2".to_string()));
        let revisions = h.repo().revisions("tx").await.unwrap();
        assert_eq!(revisions.len(), 2 - collected);
        h.assert_heads_live().await;
    }

    #[tokio::test]
    async fn test_delay_beyond_time_range_collects_nothing() {
        let h = superseded().await;
        let stats = collect(&h.ctx, at(10), Duration::seconds(400_000_000_000), false).await.unwrap();
        assert_eq!(stats, CollectStats::default());
        assert_eq!(h.repo().revisions("tx").await.unwrap().len(), 2);
        let stats = collect_orphans(&h.ctx, at(10), Duration::MAX, false).await.unwrap();
        assert_eq!(stats, CollectStats::default());
    }

    #[tokio::test]
    async fn test_live_heads_are_never_collected() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        let stats = collect(&h.ctx, at(1_000_000), Duration::ZERO, false).await.unwrap();
        assert_eq!(stats, CollectStats::default());
        assert_eq!(h.blobs().await.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_blob_drops_row() {
        let h = superseded().await;
        h.storage.delete(Path::new("tx_r1_md5r1")).await.unwrap();
        let stats = collect(&h.ctx, at(20), Duration::ZERO, false).await.unwrap();
        assert_eq!(stats.revisions, 1);
        assert_eq!(stats.blobs_missing, 1);
        assert_eq!(stats.blobs_deleted, 0);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_row_until_next_pass() {
        let h = superseded().await;
        h.storage.fail_deletes("tx_r1_md5r1").await;
        let stats = collect(&h.ctx, at(20), Duration::ZERO, false).await.unwrap();
        assert_eq!(stats.blob_failures, 1);
        assert_eq!(stats.revisions, 0);
        assert_eq!(h.repo().revisions("tx").await.unwrap().len(), 2);

        h.storage.heal_deletes("tx_r1_md5r1").await;
        let stats = collect(&h.ctx, at(30), Duration::ZERO, false).await.unwrap();
        assert_eq!(stats.revisions, 1);
        assert_eq!(h.repo().revisions("tx").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_removed_files_are_collected_after_their_content() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote.remove("d1").await.unwrap();
        h.remote.remove("doc").await.unwrap();
        reconcile_at(&h.ctx, at(10)).await.unwrap();

        let stats = collect(&h.ctx, at(20), Duration::ZERO, false).await.unwrap();
        assert_eq!(stats.revisions, 1);
        assert_eq!(stats.versions, 1);
        assert_eq!(stats.files, 3);
        assert_eq!(stats.blobs_deleted, 3);
        assert!(h.blobs().await.is_empty());
        for id in ["d1", "tx", "doc"] {
            assert!(h.repo().get_file_by_id(id, true).await.unwrap().is_none());
        }
        assert_eq!(h.repo().get_tree(None).await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_version_kept_if_any_export_fails() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.remote.remove("doc").await.unwrap();
        reconcile_at(&h.ctx, at(10)).await.unwrap();
        h.storage.fail_deletes("doc_20231114_221320000000.txt").await;

        let stats = collect(&h.ctx, at(20), Duration::ZERO, false).await.unwrap();
        assert_eq!(stats.versions, 0);
        assert_eq!(stats.files, 0);
        assert_eq!(stats.blobs_deleted, 1);
        assert_eq!(stats.blob_failures, 1);
        assert!(h.repo().get_file_by_id("doc", true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let h = superseded().await;
        let stats = collect(&h.ctx, at(20), Duration::ZERO, true).await.unwrap();
        assert_eq!(stats.revisions, 1);
        assert_eq!(stats.blobs_deleted, 1);
        assert!(h.blobs().await.contains(&"tx_r1_md5r1".to_string()));
        assert_eq!(h.repo().revisions("tx").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_orphaned_blobs() {
        let h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        assert!(orphaned_blobs(&h.repo(), &h.ctx.storage).await.unwrap().is_empty());

        h.storage.write(Path::new("stray.bin"), b"stray").await.unwrap();
        let orphans = orphaned_blobs(&h.repo(), &h.ctx.storage).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].path, Path::new("stray.bin"));
        assert_eq!(orphans[0].size, 5);
    }

    #[tokio::test]
    async fn test_dropped_export_formats_are_collected_as_orphans() {
        let mut h = Harness::new(sample_tree()).await;
        reconcile_at(&h.ctx, at(0)).await.unwrap();
        h.ctx.preferences = parse_preferences("document: pdf");
        reconcile_at(&h.ctx, at(10)).await.unwrap();
        let txt = "doc_20231114_221320000000.txt";
        let orphans = orphaned_blobs(&h.repo(), &h.ctx.storage).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].path, Path::new(txt));

        // Blobs were just written, so a recent pass leaves them alone.
        let delay = Duration::hours(1);
        let stats = collect_orphans(&h.ctx, UtcDateTime::now(), delay, false).await.unwrap();
        assert_eq!(stats.blobs_deleted, 0);
        assert!(h.blobs().await.contains(&txt.to_string()));

        let later = UtcDateTime::now() + Duration::hours(2);
        let stats = collect_orphans(&h.ctx, later, delay, true).await.unwrap();
        assert_eq!(stats.blobs_deleted, 1);
        assert!(h.blobs().await.contains(&txt.to_string()));

        let stats = collect_orphans(&h.ctx, later, delay, false).await.unwrap();
        assert_eq!(stats.blobs_deleted, 1);
        assert!(!h.blobs().await.contains(&txt.to_string()));
        assert!(h.blobs().await.contains(&"doc_20231114_221320000000.pdf".to_string()));
        assert!(orphaned_blobs(&h.repo(), &h.ctx.storage).await.unwrap().is_empty());
        h.assert_heads_live().await;
    }
}
