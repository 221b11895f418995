//! Layered configuration for the data lake mirror.
//!
//! Values are resolved in order, later layers winning:
//!
//! 1. Built-in defaults (paths under the platform's data directory).
//! 2. An optional file, read as TOML, YAML or JSON depending on its
//!    extension.
//! 3. Environment variables prefixed with `LAKE_`, nested with `__`
//!    (`LAKE_LOCAL__DELETION_DELAY=3600`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "LAKE_";
const DEFAULT_DELETION_DELAY_SECS: u64 = 24 * 60 * 60;
const DEFAULT_EXPORT_FORMATS: &str = "document: docx,pdf\nspreadsheet: xlsx,pdf\npresentation: pptx,pdf\n";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    pub database: DatabaseConfig,
}

/// Where the mirror is pulled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub shared_drive_id: Option<String>,
    /// A directory anywhere below the shared root; mirrors only that subtree.
    pub sub_tree_root_id: Option<String>,
    /// One `type: ext,ext` line per document type.
    pub export_formats: String,
}
impl Default for RemoteConfig {
    fn default() -> Self {
        Self { shared_drive_id: None, sub_tree_root_id: None, export_formats: DEFAULT_EXPORT_FORMATS.to_string() }
    }
}
impl RemoteConfig {
    /// Id of the directory the mirror starts from.
    pub fn root_id(&self) -> Result<&str> {
        match (&self.sub_tree_root_id, &self.shared_drive_id) {
            (Some(id), _) | (None, Some(id)) => Ok(id.as_str()),
            (None, None) => exn::bail!(ErrorKind::Missing("remote.shared_drive_id or remote.sub_tree_root_id")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory that holds fetched blobs.
    pub root_path: PathBuf,
    /// Seconds an obsolete row is kept before collection may remove it.
    pub deletion_delay: u64,
}
impl Default for LocalConfig {
    fn default() -> Self {
        Self { root_path: data_dir().join("blobs"), deletion_delay: DEFAULT_DELETION_DELAY_SECS }
    }
}
impl LocalConfig {
    pub fn deletion_delay(&self) -> Duration {
        Duration::from_secs(self.deletion_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}
impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: data_dir().join("catalog.sqlite") }
    }
}

fn data_dir() -> PathBuf {
    // No home directory (some containers): stay relative to the working directory.
    ProjectDirs::from("", "", "lake").map(|dirs| dirs.data_dir().to_path_buf()).unwrap_or_default()
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(file)?.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Defaults plus the optional file, without the environment layer.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let Some(path) = file else {
            return Ok(figment);
        };
        tracing::debug!(path = %path.display(), "Reading configuration file");
        let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
        Ok(match extension.as_deref() {
            Some("toml") => figment.merge(Toml::file_exact(path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
            Some("json") => figment.merge(Json::file_exact(path)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
        })
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Invalid)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.remote.root_id()?;
        if self.local.root_path.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Missing("local.root_path"));
        }
        if self.database.path.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Missing("database.path"));
        }
        Ok(())
    }
}
