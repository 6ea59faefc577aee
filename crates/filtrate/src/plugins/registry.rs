//! Filter registration and lookup.
//!
//! Two registries live here:
//!
//! - [`FilterRegistry`]: the ordered, read-only list of configured
//!   [`FilterSpec`]s the dispatcher matches files against.
//! - [`FilterCatalog`]: the table of constructible filter kinds the loader
//!   resolves `module.Symbol` references against. Built-in filters are a
//!   closed [`BuiltinFilter`] enum; additional kinds are registered through
//!   [`register_filter_factory`] during process initialization.

use crate::core::config::FiltrateConfig;
use crate::error::LoaderError;
use crate::filters::BuiltinFilter;
use crate::plugins::{FilterArgs, FilterContext, MetadataFilter};
use crate::types::FilterSpec;
use crate::{FiltrateError, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Ordered list of configured filters.
///
/// Built once from configuration and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct FilterRegistry {
    specs: Vec<FilterSpec>,
}

impl FilterRegistry {
    pub fn new(specs: Vec<FilterSpec>) -> Self {
        Self { specs }
    }

    pub fn from_config(config: &FiltrateConfig) -> Self {
        Self::new(config.filters.clone())
    }

    /// Specs that claim `extension`, in configuration order.
    pub fn matching<'a>(&'a self, extension: &'a str, case_sensitive: bool) -> impl Iterator<Item = &'a FilterSpec> + 'a {
        self.specs
            .iter()
            .filter(move |spec| spec.accepts(extension, case_sensitive))
    }

    /// Look up a spec by output name (compared case-insensitively).
    pub fn get(&self, output_name: &str) -> Option<&FilterSpec> {
        self.specs
            .iter()
            .find(|spec| spec.output_name.eq_ignore_ascii_case(output_name))
    }

    pub fn specs(&self) -> &[FilterSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Constructor for a registered filter kind.
pub type FilterFactory =
    Arc<dyn Fn(&FilterArgs<'_>, &FilterContext) -> Result<Arc<dyn MetadataFilter>> + Send + Sync>;

/// One resolvable filter kind.
#[derive(Clone)]
pub enum CatalogEntry {
    Builtin(BuiltinFilter),
    Factory(FilterFactory),
}

impl CatalogEntry {
    /// Build a fresh filter instance.
    pub fn construct(&self, args: &FilterArgs<'_>, context: &FilterContext) -> Result<Arc<dyn MetadataFilter>> {
        match self {
            CatalogEntry::Builtin(builtin) => builtin.construct(args, context),
            CatalogEntry::Factory(factory) => factory(args, context),
        }
    }
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogEntry::Builtin(builtin) => f.debug_tuple("Builtin").field(builtin).finish(),
            CatalogEntry::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Module-path to symbol table of constructible filter kinds.
#[derive(Debug, Clone, Default)]
pub struct FilterCatalog {
    modules: IndexMap<String, IndexMap<String, CatalogEntry>>,
}

impl FilterCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog holding every [`BuiltinFilter`].
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for builtin in BuiltinFilter::ALL {
            catalog.insert(builtin.module(), builtin.symbol(), CatalogEntry::Builtin(builtin));
        }
        catalog
    }

    /// Register a factory under `module.symbol`.
    ///
    /// An existing entry under the same reference is replaced.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` when the module or symbol is empty or
    /// contains whitespace, or when the symbol contains a `.`.
    pub fn register(&mut self, module: &str, symbol: &str, factory: FilterFactory) -> Result<()> {
        validate_reference_part(module, "module")?;
        validate_reference_part(symbol, "symbol")?;
        if symbol.contains('.') {
            return Err(FiltrateError::validation(format!(
                "Filter symbol '{}' cannot contain '.'",
                symbol
            )));
        }

        if self.insert(module, symbol, CatalogEntry::Factory(factory)).is_some() {
            tracing::debug!("Replaced catalog entry {}.{}", module, symbol);
        }
        Ok(())
    }

    /// Remove the entry under `module.symbol`, returning whether it existed.
    pub fn remove(&mut self, module: &str, symbol: &str) -> bool {
        let Some(symbols) = self.modules.get_mut(module) else {
            return false;
        };
        let removed = symbols.shift_remove(symbol).is_some();
        if symbols.is_empty() {
            self.modules.shift_remove(module);
        }
        removed
    }

    /// Resolve a `module.Symbol` reference.
    ///
    /// # Errors
    ///
    /// - `MalformedReference` when the reference has no `.` separator or an empty part
    /// - `UnknownModule` when no entry lives under the module path
    /// - `MissingSymbol` when the module exists but has no such symbol
    pub fn resolve(&self, loadable_ref: &str) -> std::result::Result<CatalogEntry, LoaderError> {
        let (module, symbol) = split_reference(loadable_ref)?;

        let symbols = self
            .modules
            .get(module)
            .ok_or_else(|| LoaderError::UnknownModule(module.to_string()))?;

        symbols
            .get(symbol)
            .cloned()
            .ok_or_else(|| LoaderError::MissingSymbol {
                module: module.to_string(),
                symbol: symbol.to_string(),
            })
    }

    /// Every resolvable reference, in registration order.
    pub fn references(&self) -> Vec<String> {
        self.modules
            .iter()
            .flat_map(|(module, symbols)| symbols.keys().map(move |symbol| format!("{}.{}", module, symbol)))
            .collect()
    }

    pub fn contains(&self, loadable_ref: &str) -> bool {
        self.resolve(loadable_ref).is_ok()
    }

    fn insert(&mut self, module: &str, symbol: &str, entry: CatalogEntry) -> Option<CatalogEntry> {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(symbol.to_string(), entry)
    }
}

/// Split a reference at its last `.` into `(module, symbol)`.
pub fn split_reference(loadable_ref: &str) -> std::result::Result<(&str, &str), LoaderError> {
    match loadable_ref.rsplit_once('.') {
        Some((module, symbol)) if !module.is_empty() && !symbol.is_empty() => Ok((module, symbol)),
        _ => Err(LoaderError::MalformedReference(loadable_ref.to_string())),
    }
}

fn validate_reference_part(part: &str, kind: &str) -> Result<()> {
    if part.is_empty() {
        return Err(FiltrateError::validation(format!("Filter {} cannot be empty", kind)));
    }

    if part.contains(char::is_whitespace) {
        return Err(FiltrateError::validation(format!(
            "Filter {} '{}' cannot contain whitespace",
            kind, part
        )));
    }

    Ok(())
}

/// Global filter catalog, pre-populated with the built-in filters.
pub static FILTER_CATALOG: Lazy<Arc<RwLock<FilterCatalog>>> =
    Lazy::new(|| Arc::new(RwLock::new(FilterCatalog::with_builtins())));

/// Get the global filter catalog.
pub fn get_filter_catalog() -> Arc<RwLock<FilterCatalog>> {
    FILTER_CATALOG.clone()
}

/// Register a filter factory in the global catalog.
///
/// Call this during process initialization, before any job is dispatched.
///
/// # Example
///
/// ```rust
/// use filtrate::plugins::{register_filter_factory, MetadataFilter, Plugin};
/// use filtrate::types::ExtractedMetadata;
/// use filtrate::Result;
/// use async_trait::async_trait;
/// use std::path::Path;
/// use std::sync::Arc;
///
/// struct EmptyFilter;
///
/// impl Plugin for EmptyFilter {
///     fn name(&self) -> &str { "empty-filter" }
///     fn version(&self) -> String { "1.0.0".to_string() }
///     fn initialize(&self) -> Result<()> { Ok(()) }
///     fn shutdown(&self) -> Result<()> { Ok(()) }
/// }
///
/// #[async_trait]
/// impl MetadataFilter for EmptyFilter {
///     async fn apply(&self, _: i64, _: &Path, _: &str) -> Option<ExtractedMetadata> {
///         Some(ExtractedMetadata::new())
///     }
/// }
///
/// register_filter_factory("site.filters", "EmptyFilter", |_args, _ctx| {
///     Ok(Arc::new(EmptyFilter) as Arc<dyn MetadataFilter>)
/// })?;
/// # Ok::<(), filtrate::FiltrateError>(())
/// ```
pub fn register_filter_factory<F>(module: &str, symbol: &str, factory: F) -> Result<()>
where
    F: Fn(&FilterArgs<'_>, &FilterContext) -> Result<Arc<dyn MetadataFilter>> + Send + Sync + 'static,
{
    let catalog = get_filter_catalog();
    let mut catalog = catalog
        .write()
        .map_err(|e| FiltrateError::LockPoisoned(format!("Filter catalog lock poisoned: {}", e)))?;
    catalog.register(module, symbol, Arc::new(factory))
}
