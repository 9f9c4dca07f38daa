//! Configuration for reposync.
//!
//! A single TOML document configures every component:
//!
//! ```toml
//! [vocabulary]
//! canonical_namespace = "info:reposync/object/"
//!
//! [session]
//! autocommit_every = 500
//! keep_alive_interval_ms = 30000
//!
//! [import]
//! managed_namespaces = ["https://data.example.org/"]
//!
//! [index]
//! max_depth = 8
//! change_detection = "digest"
//! ```
//!
//! Every field has a default, so an empty document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub use reposync_model::Vocabulary;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub vocabulary: Vocabulary,
    pub session: SessionSettings,
    pub import: ImportSettings,
    pub index: IndexSettings,
}

/// What to do when identifier candidates stay ambiguous after verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum StaleIndexSetting {
    /// Report the ambiguity immediately
    Fail,
    /// Re-query the index up to `attempts` more times
    Retry { attempts: u32, delay_ms: u64 },
}

impl Default for StaleIndexSetting {
    fn default() -> Self {
        StaleIndexSetting::Fail
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Commit and reopen after this many touched objects
    pub autocommit_every: Option<usize>,
    pub keep_alive_interval_ms: u64,
    /// Attempts per transport call, including the first
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub stale_index: StaleIndexSetting,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            autocommit_every: None,
            keep_alive_interval_ms: 60_000,
            max_retries: 3,
            retry_backoff_ms: 500,
            stale_index: StaleIndexSetting::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    /// Namespaces whose references must become canonical ids before a node
    /// referring to them can be written
    pub managed_namespaces: Vec<String>,
    /// Identifier-only nodes in this namespace are created as stubs
    pub promote_namespace: Option<String>,
    /// Create identifier-only nodes regardless of namespace
    pub create_stubs: bool,
    /// Report unresolvable cycles as a warning instead of failing
    pub tolerate_partial: bool,
    /// Properties never deleted by a diff update, beyond the identifier
    pub protected_properties: Vec<String>,
}

/// How the indexer decides that a file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDetection {
    Always,
    Digest,
    Modified,
}

/// What the indexer does when a metadata lookup reports missing metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingMetadataPolicy {
    Skip,
    Propagate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub max_depth: usize,
    /// Glob patterns a file name must match (empty matches everything)
    pub include: Vec<String>,
    /// Glob patterns excluding files and directories
    pub exclude: Vec<String>,
    /// Attach every descendant directly to the root
    pub flat: bool,
    pub versioning: bool,
    pub change_detection: ChangeDetection,
    /// Files larger than this are indexed as metadata-only objects
    pub upload_threshold_bytes: Option<u64>,
    pub require_metadata: bool,
    pub on_missing_metadata: MissingMetadataPolicy,
    /// Move persistent identifiers to the new version
    pub migrate_persistent_ids: bool,
    /// Prefix of the identifier derived from a file's relative path
    pub identifier_namespace: String,
    /// Suffix of sidecar metadata files
    pub sidecar_suffix: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            max_depth: 16,
            include: Vec::new(),
            exclude: Vec::new(),
            flat: false,
            versioning: true,
            change_detection: ChangeDetection::Digest,
            upload_threshold_bytes: None,
            require_metadata: false,
            on_missing_metadata: MissingMetadataPolicy::Skip,
            migrate_persistent_ids: false,
            identifier_namespace: "file:///".to_string(),
            sidecar_suffix: ".meta.json".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: SyncConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Platform config location, e.g. `~/.config/reposync/reposync.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "reposync", "reposync")
            .map(|dirs| dirs.config_dir().join("reposync.toml"))
    }

    /// Load from [`SyncConfig::default_path`], falling back to defaults when
    /// no file exists there.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let vocab = &self.vocabulary;
        let required = [
            ("canonical_namespace", &vocab.canonical_namespace),
            ("identifier_property", &vocab.identifier_property),
            ("title_property", &vocab.title_property),
            ("parent_property", &vocab.parent_property),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "vocabulary.{} must not be empty",
                    name
                )));
            }
        }
        if self.session.keep_alive_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.keep_alive_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.session.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "session.max_retries must be at least 1".to_string(),
            ));
        }
        if self.session.autocommit_every == Some(0) {
            return Err(ConfigError::Invalid(
                "session.autocommit_every must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}
