//! Error types for Filtrate.
//!
//! All fallible operations return [`FiltrateError`]. The taxonomy mirrors how
//! failures are contained at runtime:
//!
//! - `Io` - file system and process spawn errors (always bubble up unchanged)
//! - `Configuration` - bad config files, bad filter declarations, missing filter arguments
//! - `Loader` - a loadable reference could not be resolved into a filter
//! - `Lock` - the lock service backend could not confirm an operation
//! - `Sink` - the result sink rejected a publish
//! - `Plugin` - a loaded filter failed to initialize
//!
//! None of these ever reach the caller of [`crate::dispatch::Dispatcher::dispatch`];
//! the job runner logs them and drops the job.
//!
//! # Example
//!
//! ```rust
//! use filtrate::{FiltrateError, Result};
//!
//! fn ttl_from_config(raw: u64) -> Result<u64> {
//!     if raw == 0 {
//!         return Err(FiltrateError::configuration("lock ttl must be positive"));
//!     }
//!     Ok(raw)
//! }
//!
//! assert!(ttl_from_config(0).is_err());
//! ```
use thiserror::Error;

/// Result type alias using `FiltrateError`.
pub type Result<T> = std::result::Result<T, FiltrateError>;

/// Reasons a loadable reference could not become a filter instance.
///
/// Each variant is a distinct configuration error; it is fatal only to the
/// job that attempted the load.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("'{0}' isn't a filter reference (expected 'module.Symbol')")]
    MalformedReference(String),

    #[error("Error importing filter module '{0}'")]
    UnknownModule(String),

    #[error("Filter module '{module}' does not define a '{symbol}' filter")]
    MissingSymbol { module: String, symbol: String },

    #[error("Cannot construct filter '{filter}': {message}")]
    Construction { filter: String, message: String },
}

/// Main error type for all Filtrate operations.
#[derive(Debug, Error)]
pub enum FiltrateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Lock service error: {message}")]
    Lock {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Result sink error: {message}")]
    Sink {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Filter loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Plugin error in '{plugin_name}': {message}")]
    Plugin { message: String, plugin_name: String },

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for FiltrateError {
    fn from(err: serde_json::Error) -> Self {
        FiltrateError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<toml::de::Error> for FiltrateError {
    fn from(err: toml::de::Error) -> Self {
        FiltrateError::Configuration {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        pastey::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl FiltrateError {
    error_constructor!(configuration, Configuration);
    error_constructor!(validation, Validation);
    error_constructor!(lock, Lock);
    error_constructor!(sink, Sink);
    error_constructor!(serialization, Serialization);

    /// True for errors that describe a broken filter declaration rather than a runtime fault.
    pub fn is_configuration(&self) -> bool {
        matches!(self, FiltrateError::Configuration { .. } | FiltrateError::Loader(_))
    }
}
