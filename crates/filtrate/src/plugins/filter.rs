//! Metadata filter plugin trait and the include/exclude tag policy.

use crate::Result;
use crate::error::LoaderError;
use crate::plugins::Plugin;
use crate::types::{ExtractedMetadata, FilterSpec};
use async_trait::async_trait;
use indexmap::IndexSet;
use std::path::Path;

/// Trait for metadata extractor plugins.
///
/// A filter inspects one file and returns the metadata it extracted, or
/// `None` when the file isn't something it handles (wrong sub-format despite
/// the extension match) or when extraction failed. Filters are expected to
/// catch their own failures, log them, and return `None`; a panic is caught
/// by the job runner and reported as a filter error.
///
/// # Example
///
/// ```rust
/// use filtrate::plugins::{MetadataFilter, Plugin};
/// use filtrate::types::ExtractedMetadata;
/// use filtrate::Result;
/// use async_trait::async_trait;
/// use std::path::Path;
///
/// struct SizeFilter;
///
/// impl Plugin for SizeFilter {
///     fn name(&self) -> &str { "size-filter" }
///     fn version(&self) -> String { "1.0.0".to_string() }
///     fn initialize(&self) -> Result<()> { Ok(()) }
///     fn shutdown(&self) -> Result<()> { Ok(()) }
/// }
///
/// #[async_trait]
/// impl MetadataFilter for SizeFilter {
///     async fn apply(&self, _file_id: i64, path: &Path, _source_uri: &str) -> Option<ExtractedMetadata> {
///         let size = tokio::fs::metadata(path).await.ok()?.len();
///         let mut metadata = ExtractedMetadata::new();
///         metadata.insert("size".to_string(), size.to_string().into());
///         Some(metadata)
///     }
/// }
/// ```
#[async_trait]
pub trait MetadataFilter: Plugin {
    /// Extract metadata from the file at `path`.
    ///
    /// # Arguments
    ///
    /// * `file_id` - Identifier of the data file
    /// * `path` - Absolute path of the file
    /// * `source_uri` - Logical location of the file inside its dataset
    async fn apply(&self, file_id: i64, path: &Path, source_uri: &str) -> Option<ExtractedMetadata>;
}

/// Include/exclude policy applied to every successful extraction.
///
/// When the include set is non-empty only those tags survive; tags in the
/// exclude set are always dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagPolicy {
    include: IndexSet<String>,
    exclude: IndexSet<String>,
}

const INCLUDE_KEYS: [&str; 2] = ["tagsToFind", "tags_to_find"];
const EXCLUDE_KEYS: [&str; 2] = ["tagsToExclude", "tags_to_exclude"];

impl TagPolicy {
    pub fn new<I, E, S>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            exclude: exclude.into_iter().map(Into::into).collect(),
        }
    }

    /// Read `tagsToFind` / `tagsToExclude` from the filter's keyword arguments.
    ///
    /// # Errors
    ///
    /// Returns a construction error when either key is present but is not a list of strings.
    pub fn from_spec(spec: &FilterSpec) -> Result<Self> {
        Ok(Self {
            include: tag_list(spec, &INCLUDE_KEYS)?,
            exclude: tag_list(spec, &EXCLUDE_KEYS)?,
        })
    }

    pub fn allows(&self, tag: &str) -> bool {
        if !self.include.is_empty() && !self.include.contains(tag) {
            return false;
        }
        !self.exclude.contains(tag)
    }

    /// Keep only the tags this policy allows, preserving their order.
    pub fn apply(&self, metadata: ExtractedMetadata) -> ExtractedMetadata {
        metadata.into_iter().filter(|(tag, _)| self.allows(tag)).collect()
    }
}

fn tag_list(spec: &FilterSpec, keys: &[&str]) -> Result<IndexSet<String>> {
    let Some((key, value)) = keys
        .iter()
        .find_map(|key| spec.kwargs.get(*key).map(|value| (*key, value)))
    else {
        return Ok(IndexSet::new());
    };

    let invalid = || LoaderError::Construction {
        filter: spec.display_name.clone(),
        message: format!("'{}' must be a list of strings", key),
    };

    match value {
        serde_json::Value::Null => Ok(IndexSet::new()),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .collect::<std::result::Result<IndexSet<_>, _>>()
            .map_err(Into::into),
        _ => Err(invalid().into()),
    }
}
