//! Data model shared by the dispatcher, the job runner, and the result sink.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A file that became available for processing.
///
/// Produced externally once per verification event and consumed exactly once
/// by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub file_id: i64,
    pub verified: bool,
    /// Absolute path of the file on local storage
    pub path: PathBuf,
    /// Logical location of the file inside its dataset
    pub source_uri: String,
}

impl FileEvent {
    pub fn new(file_id: i64, verified: bool, path: impl Into<PathBuf>, source_uri: impl Into<String>) -> Self {
        Self {
            file_id,
            verified,
            path: path.into(),
            source_uri: source_uri.into(),
        }
    }

    /// Suffix after the last `.` of the file name, if any.
    pub fn extension(&self) -> Option<&str> {
        file_extension(&self.path)
    }
}

pub(crate) fn file_extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

/// Declaration of one configured filter.
///
/// Loaded once at process start and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(alias = "name")]
    pub display_name: String,

    /// Extensions (without the leading dot) this filter claims
    #[serde(alias = "extensions", default)]
    pub accepted_extensions: IndexSet<String>,

    /// `module.Symbol` reference resolved by the filter loader
    #[serde(alias = "path")]
    pub loadable_ref: String,

    /// Short name the metadata is stored under
    pub output_name: String,

    /// Schema namespace the metadata is tagged with
    #[serde(alias = "schema")]
    pub output_schema: String,

    #[serde(default)]
    pub args: Vec<serde_json::Value>,

    #[serde(default)]
    pub kwargs: IndexMap<String, serde_json::Value>,
}

impl FilterSpec {
    pub fn new(
        display_name: impl Into<String>,
        extensions: &[&str],
        loadable_ref: impl Into<String>,
        output_name: impl Into<String>,
        output_schema: impl Into<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            accepted_extensions: extensions.iter().map(|ext| ext.to_string()).collect(),
            loadable_ref: loadable_ref.into(),
            output_name: output_name.into(),
            output_schema: output_schema.into(),
            args: Vec::new(),
            kwargs: IndexMap::new(),
        }
    }

    pub fn with_arg(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Whether this filter claims the given extension.
    ///
    /// With `case_sensitive` false both sides are compared lower-cased.
    pub fn accepts(&self, extension: &str, case_sensitive: bool) -> bool {
        if case_sensitive {
            self.accepted_extensions.contains(extension)
        } else {
            self.accepted_extensions
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(extension))
        }
    }
}

/// One scheduled filter invocation on one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterJob {
    pub spec: FilterSpec,
    pub file_id: i64,
    pub path: PathBuf,
    pub source_uri: String,
}

impl FilterJob {
    pub fn new(spec: FilterSpec, event: &FileEvent) -> Self {
        Self {
            spec,
            file_id: event.file_id,
            path: event.path.clone(),
            source_uri: event.source_uri.clone(),
        }
    }

    pub fn lock_handle(&self) -> LockHandle {
        LockHandle::for_filter(&self.spec.output_name, self.file_id)
    }
}

/// Key identifying one (filter, file) pair in the lock service.
///
/// The handle holds no state; existence of the key in the backing store is the lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockHandle(String);

impl LockHandle {
    pub fn for_filter(output_name: &str, file_id: i64) -> Self {
        Self(format!("{}-{}", output_name, file_id).to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single extracted metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    List(Vec<String>),
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(values: Vec<String>) -> Self {
        MetadataValue::List(values)
    }
}

/// Tag to value mapping produced by one filter invocation.
pub type ExtractedMetadata = IndexMap<String, MetadataValue>;

/// Message handed to the result sink after a successful extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveMetadataRequest {
    /// Name of the downstream task that persists the metadata
    pub task: String,
    pub file_id: i64,
    pub output_name: String,
    pub output_schema: String,
    pub metadata: ExtractedMetadata,
    pub queue: String,
    pub priority: u8,
}
