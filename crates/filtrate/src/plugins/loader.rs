//! Resolution of loadable references into filter instances.

use crate::core::config::FiltrateConfig;
use crate::error::LoaderError;
use crate::plugins::MetadataFilter;
use crate::plugins::registry::{FilterCatalog, get_filter_catalog};
use crate::types::FilterSpec;
use crate::{FiltrateError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Process settings handed to every filter constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterContext {
    /// Root directory preview images are written under
    pub metadata_store_path: PathBuf,
}

impl FilterContext {
    pub fn new(metadata_store_path: impl Into<PathBuf>) -> Self {
        Self {
            metadata_store_path: metadata_store_path.into(),
        }
    }

    pub fn from_config(config: &FiltrateConfig) -> Self {
        Self::new(config.metadata_store_path.clone())
    }

    pub fn metadata_store_path(&self) -> &Path {
        &self.metadata_store_path
    }
}

/// Read-only view of a spec's declared constructor arguments.
///
/// Positional indices refer to the extra `FilterSpec::args`; the output name and
/// schema are fields of the `FilterSpec` itself.
#[derive(Debug, Clone, Copy)]
pub struct FilterArgs<'a> {
    spec: &'a FilterSpec,
}

impl<'a> FilterArgs<'a> {
    pub fn new(spec: &'a FilterSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &'a FilterSpec {
        self.spec
    }

    /// Output name, which must be non-empty.
    pub fn output_name(&self) -> Result<&'a str> {
        self.non_empty("output_name", &self.spec.output_name)
    }

    /// Output schema, which must be non-empty.
    pub fn output_schema(&self) -> Result<&'a str> {
        self.non_empty("output_schema", &self.spec.output_schema)
    }

    pub fn positional(&self, index: usize) -> Option<&'a Value> {
        self.spec.args.get(index)
    }

    pub fn keyword(&self, name: &str) -> Option<&'a Value> {
        self.spec.kwargs.get(name)
    }

    /// Keyword argument `name`, falling back to the positional argument at `position`.
    pub fn get(&self, name: &str, position: Option<usize>) -> Option<&'a Value> {
        self.keyword(name)
            .or_else(|| position.and_then(|index| self.positional(index)))
            .filter(|value| !value.is_null())
    }

    /// String argument, if present.
    ///
    /// # Errors
    ///
    /// Returns a construction error when the argument is present but not a string.
    pub fn string(&self, name: &str, position: Option<usize>) -> Result<Option<String>> {
        match self.get(name, position) {
            None => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.clone())),
            Some(other) => Err(self.error(format!("argument '{}' must be a string, got {}", name, other))),
        }
    }

    /// Required non-empty string argument.
    pub fn require_string(&self, name: &str, position: Option<usize>) -> Result<String> {
        match self.string(name, position)? {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(self.error(format!("missing required argument '{}'", name))),
        }
    }

    /// String argument with a default.
    pub fn string_or(&self, name: &str, position: Option<usize>, default: &str) -> Result<String> {
        Ok(self
            .string(name, position)?
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string()))
    }

    /// Construction error attributed to this filter.
    pub fn error(&self, message: impl Into<String>) -> FiltrateError {
        LoaderError::Construction {
            filter: self.spec.display_name.clone(),
            message: message.into(),
        }
        .into()
    }

    fn non_empty(&self, field: &str, value: &'a str) -> Result<&'a str> {
        if value.trim().is_empty() {
            Err(self.error(format!("{} cannot be empty", field)))
        } else {
            Ok(value)
        }
    }
}

/// Resolves a spec's `loadable_ref` and constructs a fresh filter.
///
/// Nothing is cached: every call re-reads the catalog and builds a new
/// instance, so filters never share state across jobs.
#[derive(Debug, Clone)]
pub struct FilterLoader {
    catalog: Arc<RwLock<FilterCatalog>>,
    context: FilterContext,
}

impl FilterLoader {
    /// Loader over the global catalog.
    pub fn new(context: FilterContext) -> Self {
        Self::with_catalog(get_filter_catalog(), context)
    }

    pub fn with_catalog(catalog: Arc<RwLock<FilterCatalog>>, context: FilterContext) -> Self {
        Self { catalog, context }
    }

    pub fn context(&self) -> &FilterContext {
        &self.context
    }

    /// Build and initialize the filter declared by `spec`.
    ///
    /// # Errors
    ///
    /// - `FiltrateError::Loader` for a malformed reference, an unknown module,
    ///   a missing symbol, or invalid constructor arguments
    /// - `FiltrateError::Plugin` when the filter's `initialize` fails
    pub fn load(&self, spec: &FilterSpec) -> Result<Arc<dyn MetadataFilter>> {
        let entry = {
            let catalog = self
                .catalog
                .read()
                .map_err(|e| FiltrateError::LockPoisoned(format!("Filter catalog lock poisoned: {}", e)))?;
            catalog.resolve(&spec.loadable_ref)?
        };

        let filter = entry.construct(&FilterArgs::new(spec), &self.context)?;
        filter.initialize().map_err(|e| FiltrateError::Plugin {
            message: e.to_string(),
            plugin_name: filter.name().to_string(),
        })?;

        tracing::trace!(
            "Loaded filter '{}' ({} v{}) from {}",
            spec.display_name,
            filter.name(),
            filter.version(),
            spec.loadable_ref
        );

        Ok(filter)
    }
}
