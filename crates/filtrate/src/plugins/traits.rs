//! Base plugin trait definition.

use crate::Result;

/// Base trait that all filters implement.
///
/// Provides identification and lifecycle hooks. A fresh filter instance is
/// built for every job, so `initialize` runs once per job right after
/// construction and `shutdown` runs once after the invocation finished.
///
/// # Thread Safety
///
/// Filters must be `Send + Sync`; the job runner executes them on a spawned task.
///
/// # Example
///
/// ```rust
/// use filtrate::plugins::Plugin;
/// use filtrate::Result;
///
/// struct NoopFilter;
///
/// impl Plugin for NoopFilter {
///     fn name(&self) -> &str {
///         "noop-filter"
///     }
///
///     fn version(&self) -> String {
///         "1.0.0".to_string()
///     }
///
///     fn initialize(&self) -> Result<()> {
///         Ok(())
///     }
///
///     fn shutdown(&self) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait Plugin: Send + Sync {
    /// Unique kebab-case identifier, e.g. `"csv-image-filter"`.
    fn name(&self) -> &str;

    /// Semantic version of the plugin.
    fn version(&self) -> String;

    /// Acquire resources needed by the filter.
    ///
    /// # Errors
    ///
    /// An error here is treated like a loader failure: the job is dropped.
    fn initialize(&self) -> Result<()>;

    /// Release resources. Errors are logged and otherwise ignored.
    fn shutdown(&self) -> Result<()>;

    /// Optional description for debugging and logging.
    fn description(&self) -> &str {
        ""
    }
}
