//! Reads and writes against the catalog.
//!
//! [`Repository`] is the read side a serving layer uses: every call sees the
//! last committed pass. [`Session`] wraps one write transaction; a pass does
//! all of its work through a single session and either commits it or drops
//! it, which rolls everything back.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{
    ExportedVersion, FileRow, LocalFile, LocalKind, LocalTree, Revision, RevisionRow, VersionRow, to_micros,
};
use exn::ResultExt;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqliteExecutor, SqlitePool, Transaction};
use std::collections::{HashMap, HashSet};
use time::UtcDateTime;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Which table [`Repository::get_obsolete`] looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObsoleteKind {
    Revisions,
    Versions,
    Files,
}

/// An obsolete row waiting for collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Obsolete {
    Revision(Revision),
    Version(ExportedVersion),
    File(LocalFile),
}

/// Read access to the committed catalog.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Start a write transaction.
    pub async fn begin(&self) -> Result<Session> {
        let tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Ok(Session { tx })
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Live metadata snapshot rooted at `root_id`, or at the mirror root.
    ///
    /// Returns `None` when there is no such live file (or, without an id,
    /// when nothing has been mirrored yet). Rooting the snapshot at a regular
    /// or exportable file yields a tree of one.
    pub async fn get_tree(&self, root_id: Option<&str>) -> Result<Option<LocalTree>> {
        let root_id = match root_id {
            Some(id) => id.to_string(),
            None => match fetch_root_id(&self.pool).await? {
                Some(id) => id,
                None => return Ok(None),
            },
        };
        let files = fetch_live_subtree(&self.pool, &root_id).await?;
        Ok(LocalTree::from_files(&root_id, files))
    }

    pub async fn get_file_by_id(&self, id: &str, include_obsolete: bool) -> Result<Option<LocalFile>> {
        fetch_file(&self.pool, id, include_obsolete).await
    }

    /// Rows marked obsolete at or before `until` (any time, without it).
    pub async fn get_obsolete(&self, kind: ObsoleteKind, until: Option<UtcDateTime>) -> Result<Vec<Obsolete>> {
        let until = until.map(to_micros).transpose()?.unwrap_or(i64::MAX);
        match kind {
            ObsoleteKind::Revisions => {
                let rows: Vec<RevisionRow> = sqlx::query_as(include_str!("../queries/list_obsolete_revisions.sql"))
                    .bind(until)
                    .fetch_all(&self.pool)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
                rows.into_iter().map(|r| Revision::try_from(r).map(Obsolete::Revision)).collect()
            },
            ObsoleteKind::Versions => {
                let rows: Vec<VersionRow> = sqlx::query_as(include_str!("../queries/list_obsolete_versions.sql"))
                    .bind(until)
                    .fetch_all(&self.pool)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
                rows.into_iter().map(|r| ExportedVersion::try_from(r).map(Obsolete::Version)).collect()
            },
            ObsoleteKind::Files => {
                let rows: Vec<FileRow> = sqlx::query_as(include_str!("../queries/list_obsolete_files.sql"))
                    .bind(until)
                    .fetch_all(&self.pool)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
                rows.into_iter().map(|r| LocalFile::try_from(r).map(Obsolete::File)).collect()
            },
        }
    }

    // =========================================================================
    // Revisions & Versions
    // =========================================================================

    /// Every revision of a file, live and obsolete, oldest first.
    pub async fn revisions(&self, file_id: &str) -> Result<Vec<Revision>> {
        let rows: Vec<RevisionRow> = sqlx::query_as(include_str!("../queries/list_revisions.sql"))
            .bind(file_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Revision::try_from).collect()
    }

    /// Every exported version of a file, live and obsolete, oldest first.
    pub async fn versions(&self, file_id: &str) -> Result<Vec<ExportedVersion>> {
        let rows: Vec<VersionRow> = sqlx::query_as(include_str!("../queries/list_versions.sql"))
            .bind(file_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(ExportedVersion::try_from).collect()
    }

    /// The revision a regular file's head points at.
    pub async fn head_revision(&self, file: &LocalFile) -> Result<Option<Revision>> {
        match &file.kind {
            LocalKind::Regular { head_revision_id } => fetch_revision(&self.pool, file.id(), head_revision_id).await,
            _ => Ok(None),
        }
    }

    /// The exported version an exportable file's head points at.
    pub async fn head_version(&self, file: &LocalFile) -> Result<Option<ExportedVersion>> {
        match file.kind {
            LocalKind::Exportable { head_version } => fetch_version(&self.pool, file.id(), head_version).await,
            _ => Ok(None),
        }
    }

    /// Names of all blobs referenced by any revision or version row.
    pub async fn blob_names(&self) -> Result<HashSet<String>> {
        let revisions: Vec<RevisionRow> = sqlx::query_as(include_str!("../queries/list_all_revisions.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let versions: Vec<VersionRow> = sqlx::query_as(include_str!("../queries/list_all_versions.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let mut names = HashSet::new();
        for row in revisions {
            names.insert(Revision::try_from(row)?.blob_name());
        }
        for row in versions {
            names.extend(ExportedVersion::try_from(row)?.blob_names());
        }
        Ok(names)
    }
}

/// One write transaction against the catalog.
///
/// Dropping a session without calling [`commit`](Self::commit) rolls back
/// everything done through it.
pub struct Session {
    tx: Transaction<'static, Sqlite>,
}
impl Session {
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.or_raise(|| ErrorKind::Database)
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Live files reachable from the current mirror root, keyed by id.
    pub async fn live_files(&mut self) -> Result<HashMap<String, LocalFile>> {
        let Some(root_id) = fetch_root_id(&mut *self.tx).await? else {
            return Ok(HashMap::new());
        };
        let files = fetch_live_subtree(&mut *self.tx, &root_id).await?;
        Ok(files.into_iter().map(|f| (f.meta.id.clone(), f)).collect())
    }

    /// A file by id, live or obsolete.
    pub async fn file(&mut self, id: &str) -> Result<Option<LocalFile>> {
        fetch_file(&mut *self.tx, id, true).await
    }

    pub async fn insert_file(&mut self, file: &LocalFile) -> Result<()> {
        let row = FileRow::try_from(file)?;
        bind_file(sqlx::query(include_str!("../queries/insert_file.sql")), row)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn update_file(&mut self, file: &LocalFile) -> Result<()> {
        let row = FileRow::try_from(file)?;
        bind_file(sqlx::query(include_str!("../queries/update_file.sql")), row)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Clear the root flag from every directory except `keep_id`.
    ///
    /// Has to run before the new root's flag is set: at most one row may
    /// carry it at any time.
    pub async fn release_root_except(&mut self, keep_id: &str) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/release_root.sql"))
            .bind(keep_id)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    /// Set or clear a file's obsolescence mark, leaving its children alone.
    pub async fn set_file_obsolete(&mut self, id: &str, since: Option<UtcDateTime>) -> Result<()> {
        sqlx::query(include_str!("../queries/set_file_obsolete.sql"))
            .bind(id)
            .bind(since.map(to_micros).transpose()?)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Mark a file and its head child obsolete as of `now`.
    pub async fn retire(&mut self, file: &LocalFile, now: UtcDateTime) -> Result<()> {
        self.set_file_obsolete(file.id(), Some(now)).await?;
        match &file.kind {
            LocalKind::Directory { .. } => {},
            LocalKind::Regular { head_revision_id } => {
                self.set_revision_obsolete(file.id(), head_revision_id, Some(now)).await?;
            },
            LocalKind::Exportable { head_version } => {
                self.set_version_obsolete(file.id(), *head_version, Some(now)).await?;
            },
        }
        Ok(())
    }

    /// Delete obsolete files marked at or before `cutoff` that have no
    /// children left. Returns the deleted ids.
    pub async fn delete_collectable_files(&mut self, cutoff: UtcDateTime) -> Result<Vec<String>> {
        sqlx::query_scalar(include_str!("../queries/delete_collectable_files.sql"))
            .bind(to_micros(cutoff)?)
            .fetch_all(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    // =========================================================================
    // Revisions
    // =========================================================================

    pub async fn revision(&mut self, file_id: &str, revision_id: &str) -> Result<Option<Revision>> {
        fetch_revision(&mut *self.tx, file_id, revision_id).await
    }

    pub async fn insert_revision(&mut self, revision: &Revision) -> Result<()> {
        let row = RevisionRow::try_from(revision)?;
        bind_revision(sqlx::query(include_str!("../queries/insert_revision.sql")), row)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn update_revision(&mut self, revision: &Revision) -> Result<()> {
        let row = RevisionRow::try_from(revision)?;
        bind_revision(sqlx::query(include_str!("../queries/update_revision.sql")), row)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn set_revision_obsolete(
        &mut self,
        file_id: &str,
        revision_id: &str,
        since: Option<UtcDateTime>,
    ) -> Result<()> {
        sqlx::query(include_str!("../queries/set_revision_obsolete.sql"))
            .bind(file_id)
            .bind(revision_id)
            .bind(since.map(to_micros).transpose()?)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Obsolete revisions marked at or before `cutoff`, excluding any that
    /// are still the head of a live file.
    pub async fn collectable_revisions(&mut self, cutoff: UtcDateTime) -> Result<Vec<Revision>> {
        let rows: Vec<RevisionRow> = sqlx::query_as(include_str!("../queries/list_collectable_revisions.sql"))
            .bind(to_micros(cutoff)?)
            .fetch_all(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Revision::try_from).collect()
    }

    pub async fn delete_revision(&mut self, revision: &Revision) -> Result<()> {
        sqlx::query(include_str!("../queries/delete_revision.sql"))
            .bind(&revision.file_id)
            .bind(&revision.revision_id)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Exported Versions
    // =========================================================================

    pub async fn version(&mut self, file_id: &str, modified_time: UtcDateTime) -> Result<Option<ExportedVersion>> {
        fetch_version(&mut *self.tx, file_id, modified_time).await
    }

    pub async fn insert_version(&mut self, version: &ExportedVersion) -> Result<()> {
        let row = VersionRow::try_from(version)?;
        bind_version(sqlx::query(include_str!("../queries/insert_version.sql")), row)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn update_version(&mut self, version: &ExportedVersion) -> Result<()> {
        let row = VersionRow::try_from(version)?;
        bind_version(sqlx::query(include_str!("../queries/update_version.sql")), row)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn set_version_obsolete(
        &mut self,
        file_id: &str,
        modified_time: UtcDateTime,
        since: Option<UtcDateTime>,
    ) -> Result<()> {
        sqlx::query(include_str!("../queries/set_version_obsolete.sql"))
            .bind(file_id)
            .bind(to_micros(modified_time)?)
            .bind(since.map(to_micros).transpose()?)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Obsolete versions marked at or before `cutoff`, excluding any that
    /// are still the head of a live file.
    pub async fn collectable_versions(&mut self, cutoff: UtcDateTime) -> Result<Vec<ExportedVersion>> {
        let rows: Vec<VersionRow> = sqlx::query_as(include_str!("../queries/list_collectable_versions.sql"))
            .bind(to_micros(cutoff)?)
            .fetch_all(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(ExportedVersion::try_from).collect()
    }

    pub async fn delete_version(&mut self, version: &ExportedVersion) -> Result<()> {
        sqlx::query(include_str!("../queries/delete_version.sql"))
            .bind(&version.file_id)
            .bind(to_micros(version.modified_time)?)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}

// =============================================================================
// Shared Queries
// =============================================================================

async fn fetch_root_id(executor: impl SqliteExecutor<'_>) -> Result<Option<String>> {
    sqlx::query_scalar(include_str!("../queries/get_root_id.sql"))
        .fetch_optional(executor)
        .await
        .or_raise(|| ErrorKind::Database)
}

async fn fetch_live_subtree(executor: impl SqliteExecutor<'_>, root_id: &str) -> Result<Vec<LocalFile>> {
    let rows: Vec<FileRow> = sqlx::query_as(include_str!("../queries/live_subtree.sql"))
        .bind(root_id)
        .fetch_all(executor)
        .await
        .or_raise(|| ErrorKind::Database)?;
    rows.into_iter().map(LocalFile::try_from).collect()
}

async fn fetch_file(executor: impl SqliteExecutor<'_>, id: &str, include_obsolete: bool) -> Result<Option<LocalFile>> {
    let row: Option<FileRow> = sqlx::query_as(include_str!("../queries/get_file.sql"))
        .bind(id)
        .bind(include_obsolete)
        .fetch_optional(executor)
        .await
        .or_raise(|| ErrorKind::Database)?;
    row.map(LocalFile::try_from).transpose()
}

async fn fetch_revision(
    executor: impl SqliteExecutor<'_>,
    file_id: &str,
    revision_id: &str,
) -> Result<Option<Revision>> {
    let row: Option<RevisionRow> = sqlx::query_as(include_str!("../queries/get_revision.sql"))
        .bind(file_id)
        .bind(revision_id)
        .fetch_optional(executor)
        .await
        .or_raise(|| ErrorKind::Database)?;
    row.map(Revision::try_from).transpose()
}

async fn fetch_version(
    executor: impl SqliteExecutor<'_>,
    file_id: &str,
    modified_time: UtcDateTime,
) -> Result<Option<ExportedVersion>> {
    let row: Option<VersionRow> = sqlx::query_as(include_str!("../queries/get_version.sql"))
        .bind(file_id)
        .bind(to_micros(modified_time)?)
        .fetch_optional(executor)
        .await
        .or_raise(|| ErrorKind::Database)?;
    row.map(ExportedVersion::try_from).transpose()
}

// Insert and update statements share the column order, so they share binds.

fn bind_file(query: SqliteQuery<'_>, row: FileRow) -> SqliteQuery<'_> {
    query
        .bind(row.id)
        .bind(row.kind)
        .bind(row.name)
        .bind(row.mime_type)
        .bind(row.created_time)
        .bind(row.modified_time)
        .bind(row.modified_by)
        .bind(row.web_url)
        .bind(row.icon_url)
        .bind(row.parent_id)
        .bind(row.is_root)
        .bind(row.head_revision_id)
        .bind(row.head_version_time)
        .bind(row.obsolete_since)
}

fn bind_revision(query: SqliteQuery<'_>, row: RevisionRow) -> SqliteQuery<'_> {
    query
        .bind(row.file_id)
        .bind(row.revision_id)
        .bind(row.name)
        .bind(row.mime_type)
        .bind(row.size)
        .bind(row.content_hash)
        .bind(row.can_download)
        .bind(row.modified_time)
        .bind(row.modified_by)
        .bind(row.obsolete_since)
}

fn bind_version(query: SqliteQuery<'_>, row: VersionRow) -> SqliteQuery<'_> {
    query
        .bind(row.file_id)
        .bind(row.modified_time)
        .bind(row.name)
        .bind(row.mime_type)
        .bind(row.modified_by)
        .bind(row.can_export)
        .bind(row.extensions)
        .bind(row.obsolete_since)
}
