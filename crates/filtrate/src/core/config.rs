//! Configuration loading and management.
//!
//! Worker configuration can be loaded from TOML, YAML, or JSON files, or
//! discovered as `filtrate.toml` in the current directory or one of its parents.
//!
//! ```toml
//! metadata_store_path = "/var/lib/filtrate/metadata"
//!
//! [lock]
//! backend = "redis"
//! url = "redis://127.0.0.1:6379"
//! ttl_secs = 300
//!
//! [sink]
//! backend = "redis"
//! url = "redis://127.0.0.1:6379"
//! queue = "api"
//! priority = 4
//!
//! [[filters]]
//! display_name = "CSV image filter"
//! accepted_extensions = ["csv"]
//! loadable_ref = "filtrate.filters.csv.CsvImageFilter"
//! output_name = "CSV"
//! output_schema = "http://example.org/schemas/csv"
//! args = ["/usr/bin/ssconvert"]
//! ```

use crate::types::FilterSpec;
use crate::{FiltrateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name searched for by [`FiltrateConfig::discover`].
pub const CONFIG_FILE_NAME: &str = "filtrate.toml";

/// Environment variable pointing at an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "FILTRATE_CONFIG";

/// Default lock TTL: five minutes.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 300;

/// Top-level worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiltrateConfig {
    /// Root directory for generated preview images
    #[serde(default = "default_metadata_store_path")]
    pub metadata_store_path: PathBuf,

    /// Worker slots for concurrently running jobs (None = num_cpus * 2)
    #[serde(default)]
    pub max_concurrent_jobs: Option<usize>,

    /// Compare file extensions exactly as configured
    #[serde(default = "default_true")]
    pub case_sensitive_extensions: bool,

    /// Skip dispatch (with an error log) when the event's path does not exist
    #[serde(default)]
    pub require_existing_file: bool,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub sink: SinkConfig,

    /// Ordered filter registry
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

/// Which store backs a shared service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local; only meaningful for a single worker process or tests
    Memory,
    Redis,
}

/// Lock service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_backend")]
    pub backend: BackendKind,

    /// Connection URL (required for `redis`)
    #[serde(default)]
    pub url: Option<String>,

    /// Seconds after which an unreleased lock is considered abandoned
    #[serde(default = "default_lock_ttl")]
    pub ttl_secs: u64,

    /// Prepended to every lock handle in the backing store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Result sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_backend")]
    pub backend: SinkBackendKind,

    /// Connection URL (required for `redis`)
    #[serde(default)]
    pub url: Option<String>,

    /// Queue the save-metadata messages are routed to
    #[serde(default = "default_queue")]
    pub queue: String,

    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Downstream task name carried in every message
    #[serde(default = "default_task_name")]
    pub task_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkBackendKind {
    /// In-process channel drained by the embedding application
    Channel,
    Redis,
}

fn default_true() -> bool {
    true
}

fn default_metadata_store_path() -> PathBuf {
    PathBuf::from("metadata")
}

fn default_lock_backend() -> BackendKind {
    BackendKind::Memory
}

fn default_lock_ttl() -> u64 {
    DEFAULT_LOCK_TTL_SECS
}

fn default_key_prefix() -> String {
    "filter".to_string()
}

fn default_sink_backend() -> SinkBackendKind {
    SinkBackendKind::Channel
}

fn default_queue() -> String {
    "api".to_string()
}

fn default_priority() -> u8 {
    4
}

fn default_task_name() -> String {
    "tardis_portal.datafile.save_metadata".to_string()
}

impl Default for FiltrateConfig {
    fn default() -> Self {
        Self {
            metadata_store_path: default_metadata_store_path(),
            max_concurrent_jobs: None,
            case_sensitive_extensions: true,
            require_existing_file: false,
            lock: LockConfig::default(),
            sink: SinkConfig::default(),
            filters: Vec::new(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: default_lock_backend(),
            url: None,
            ttl_secs: default_lock_ttl(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            backend: default_sink_backend(),
            url: None,
            queue: default_queue(),
            priority: default_priority(),
            task_name: default_task_name(),
        }
    }
}

impl FiltrateConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `FiltrateError::Configuration` if the file can't be read or is invalid TOML.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        toml::from_str(&content).map_err(|e| {
            FiltrateError::configuration(format!("Invalid TOML in {}: {}", path.as_ref().display(), e))
        })
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        serde_yaml_ng::from_str(&content).map_err(|e| {
            FiltrateError::configuration(format!("Invalid YAML in {}: {}", path.as_ref().display(), e))
        })
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        serde_json::from_str(&content).map_err(|e| {
            FiltrateError::configuration(format!("Invalid JSON in {}: {}", path.as_ref().display(), e))
        })
    }

    /// Load configuration, picking the format from the file extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("yaml") | Some("yml") => Self::from_yaml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(FiltrateError::configuration(format!(
                "Unsupported config format: {} (expected .toml, .yaml, .yml or .json)",
                path.display()
            ))),
        }
    }

    /// Discover `filtrate.toml` in the current directory or its parents.
    ///
    /// # Returns
    ///
    /// - `Some(config)` if found
    /// - `None` if no config file found
    pub fn discover() -> Result<Option<Self>> {
        let mut current = std::env::current_dir().map_err(FiltrateError::Io)?;

        loop {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Ok(Some(Self::from_toml_file(candidate)?));
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(None)
    }

    /// Resolve configuration the way the worker does at startup: explicit
    /// path, then `FILTRATE_CONFIG`, then discovery, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = if let Some(path) = explicit {
            Self::from_file(path)?
        } else if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
            Self::from_file(PathBuf::from(path))?
        } else {
            Self::discover()?.unwrap_or_default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde can't express.
    pub fn validate(&self) -> Result<()> {
        if self.lock.ttl_secs == 0 {
            return Err(FiltrateError::configuration("lock.ttl_secs must be greater than zero"));
        }

        if self.lock.backend == BackendKind::Redis && self.lock.url.is_none() {
            return Err(FiltrateError::configuration("lock.url is required for the redis backend"));
        }

        if self.sink.backend == SinkBackendKind::Redis && self.sink.url.is_none() {
            return Err(FiltrateError::configuration("sink.url is required for the redis backend"));
        }

        if self.max_concurrent_jobs == Some(0) {
            return Err(FiltrateError::configuration("max_concurrent_jobs must be greater than zero"));
        }

        let mut output_names = HashSet::new();
        for spec in &self.filters {
            if spec.display_name.trim().is_empty() {
                return Err(FiltrateError::configuration("filter display_name cannot be empty"));
            }
            if spec.loadable_ref.trim().is_empty() {
                return Err(FiltrateError::configuration(format!(
                    "filter '{}' has an empty loadable_ref",
                    spec.display_name
                )));
            }
            if spec.output_name.trim().is_empty() {
                return Err(FiltrateError::configuration(format!(
                    "filter '{}' has an empty output_name",
                    spec.display_name
                )));
            }
            // Two filters sharing an output name would share lock handles.
            if !output_names.insert(spec.output_name.to_lowercase()) {
                return Err(FiltrateError::configuration(format!(
                    "duplicate filter output_name '{}'",
                    spec.output_name
                )));
            }
        }

        Ok(())
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs.unwrap_or_else(|| num_cpus::get() * 2)
    }
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| FiltrateError::configuration(format!("Failed to read config file {}: {}", path.display(), e)))
}
