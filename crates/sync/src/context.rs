use crate::error::{ErrorKind, Result};
use crate::formats::{Preferences, parse_preferences};
use exn::ResultExt;
use lake_catalog::{Database, Repository};
use lake_config::Config;
use lake_remote::ProviderHandle;
use lake_storage::BackendHandle;
use lake_storage::backend::LocalBackend;
use std::sync::Arc;
use time::Duration;

/// Everything a reconciliation or collection pass works with.
///
/// Passes borrow the context; it's built once per process.
#[derive(Clone)]
pub struct Context {
    pub remote: ProviderHandle,
    pub storage: BackendHandle,
    pub database: Database,
    pub preferences: Preferences,
    /// How long obsolete content is kept before collection removes it.
    pub deletion_delay: Duration,
}

impl Context {
    /// A context with no export preferences and no deletion delay.
    pub fn new(remote: ProviderHandle, storage: BackendHandle, database: Database) -> Self {
        Self { remote, storage, database, preferences: Preferences::new(), deletion_delay: Duration::ZERO }
    }

    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_deletion_delay(mut self, delay: Duration) -> Self {
        self.deletion_delay = delay;
        self
    }

    /// Open the catalog and blob directory named in the configuration.
    pub async fn from_config(config: &Config, remote: ProviderHandle) -> Result<Self> {
        let database = Database::connect(&config.database.path).await.or_raise(|| ErrorKind::Catalog)?;
        let storage = LocalBackend::new("local", &config.local.root_path).or_raise(|| ErrorKind::Storage)?;
        let deletion_delay = Duration::try_from(config.local.deletion_delay()).or_raise(|| ErrorKind::Config)?;
        tracing::debug!(
            catalog = %config.database.path.display(),
            blobs = %config.local.root_path.display(),
            deletion_delay = %deletion_delay,
            "Sync context ready"
        );
        Ok(Self::new(remote, Arc::new(storage), database)
            .with_preferences(parse_preferences(&config.remote.export_formats))
            .with_deletion_delay(deletion_delay))
    }

    /// Read access to the committed catalog.
    pub fn catalog(&self) -> Repository {
        Repository::from(&self.database)
    }
}
