//! Filter plugin system.
//!
//! A filter is an extractor that inspects one file and optionally returns
//! metadata (usually including the path of a generated preview image).
//!
//! # Plugin Types
//!
//! - [`Plugin`]: identification and lifecycle hooks shared by all filters
//! - [`MetadataFilter`]: the async `apply(file_id, path, source_uri)` contract
//!
//! # Resolution
//!
//! Each configured [`FilterSpec`](crate::types::FilterSpec) names its
//! implementation with a dotted `module.Symbol` reference. The
//! [`FilterLoader`] resolves that reference against the [`FilterCatalog`]
//! on every job and builds a fresh instance from the `FilterSpec` arguments.
//!
//! # Example
//!
//! ```rust
//! use filtrate::plugins::{FilterContext, FilterLoader};
//! use filtrate::types::FilterSpec;
//!
//! let loader = FilterLoader::new(FilterContext::new("/var/lib/filtrate/metadata"));
//! let spec = FilterSpec::new("PDF", &["pdf"], "filtrate.filters.pdf.PdfImageFilter", "PDF", "http://example.org/pdf");
//! let filter = loader.load(&spec)?;
//! assert_eq!(filter.name(), "pdf-image-filter");
//! # Ok::<(), filtrate::FiltrateError>(())
//! ```

mod filter;
mod loader;
pub mod registry;
mod traits;

pub use filter::{MetadataFilter, TagPolicy};
pub use loader::{FilterArgs, FilterContext, FilterLoader};
pub use registry::{
    CatalogEntry, FilterCatalog, FilterFactory, FilterRegistry, get_filter_catalog, register_filter_factory,
};
pub use traits::Plugin;
