//! Worker configuration and process-level runtime support.
//!
//! - **Configuration** (`config`): loading `FiltrateConfig` from TOML, YAML, or JSON
//! - **Runtime** (`runtime`): one-time initialization handles for filter backends

pub mod config;
pub mod runtime;

pub use config::{BackendKind, FiltrateConfig, LockConfig, SinkBackendKind, SinkConfig};
pub use runtime::InitHandle;
