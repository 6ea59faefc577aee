//! Flow cytometry (FCS) filter.
//!
//! Two helper scripts do the work: `fcsplot` renders a preview plot and
//! `showinf` dumps the file header. Both run under an interpreter
//! (`python3` unless configured otherwise).

use super::{ensure_parent_dir, has_suffix, run_command, thumbnail_paths};
use crate::Result;
use crate::plugins::{FilterArgs, FilterContext, MetadataFilter, Plugin};
use crate::types::ExtractedMetadata;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

const DEFAULT_INTERPRETER: &str = "python3";

/// Preview and header metadata for FCS files.
///
/// # Arguments
///
/// - `fcsplot_path` (keyword, or first positional): plot script, required
/// - `showinf_path` (keyword, or second positional): header dump script, required
/// - `interpreter` (keyword): program the scripts run under, default `python3`
#[derive(Debug, Clone)]
pub struct FcsImageFilter {
    fcsplot_path: PathBuf,
    showinf_path: PathBuf,
    interpreter: String,
    store: PathBuf,
}

impl FcsImageFilter {
    pub fn new(fcsplot_path: impl Into<PathBuf>, showinf_path: impl Into<PathBuf>, store: impl Into<PathBuf>) -> Self {
        Self {
            fcsplot_path: fcsplot_path.into(),
            showinf_path: showinf_path.into(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            store: store.into(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn from_args(args: &FilterArgs<'_>, context: &FilterContext) -> Result<Self> {
        args.output_name()?;
        args.output_schema()?;

        Ok(Self::new(
            args.require_string("fcsplot_path", Some(0))?,
            args.require_string("showinf_path", Some(1))?,
            context.metadata_store_path().to_path_buf(),
        )
        .with_interpreter(args.string_or("interpreter", None, DEFAULT_INTERPRETER)?))
    }

    async fn plot(&self, file_id: i64, path: &Path, source_uri: &str) -> Result<Option<String>> {
        let (thumb_rel, thumb_abs) = thumbnail_paths(&self.store, file_id, path, source_uri, "png", false);
        ensure_parent_dir(&thumb_abs).await?;

        run_command(
            &self.interpreter,
            &[self.fcsplot_path.as_os_str(), path.as_os_str(), thumb_abs.as_os_str()],
            None,
        )
        .await;

        Ok(tokio::fs::try_exists(&thumb_abs).await?.then_some(thumb_rel))
    }

    async fn header(&self, path: &Path) -> Option<ExtractedMetadata> {
        let output = run_command(
            &self.interpreter,
            &[self.showinf_path.as_os_str(), path.as_os_str()],
            None,
        )
        .await?;
        Some(parse_showinf_output(&output))
    }
}

/// Parse `showinf` output into `file`, `date`, and `parametersAndStainsTable`.
///
/// All three tags are always present; the table is the concatenation of the
/// lines between `<ParametersAndStains>` and `</ParametersAndStains>`.
pub fn parse_showinf_output(output: &str) -> ExtractedMetadata {
    let mut file = String::new();
    let mut date = String::new();
    let mut table = String::new();
    let mut in_table = false;

    for line in output.lines() {
        if let Some(value) = line.strip_prefix("File: ") {
            file = value.to_string();
        }
        if let Some(value) = line.strip_prefix("Date: ") {
            date = value.to_string();
        }

        match line.trim() {
            "<ParametersAndStains>" => in_table = true,
            "</ParametersAndStains>" => in_table = false,
            _ if in_table => table.push_str(line),
            _ => {}
        }
    }

    let mut metadata = ExtractedMetadata::new();
    metadata.insert("file".to_string(), file.into());
    metadata.insert("date".to_string(), date.into());
    metadata.insert("parametersAndStainsTable".to_string(), table.into());
    metadata
}

impl Plugin for FcsImageFilter {
    fn name(&self) -> &str {
        "fcs-image-filter"
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn description(&self) -> &str {
        "Plots FCS previews and extracts FCS header metadata"
    }
}

#[async_trait]
impl MetadataFilter for FcsImageFilter {
    async fn apply(&self, file_id: i64, path: &Path, source_uri: &str) -> Option<ExtractedMetadata> {
        if !has_suffix(path, &[".fcs"]) {
            return None;
        }

        tracing::info!("Applying FCS filter to {}...", path.display());

        let mut metadata = ExtractedMetadata::new();

        match self.plot(file_id, path, source_uri).await {
            Ok(Some(preview)) => {
                metadata.insert("previewImage".to_string(), preview.into());
            }
            Ok(None) => tracing::warn!("fcsplot produced no preview for {}", path.display()),
            Err(e) => {
                tracing::error!("FCS filter failed for {}: {}", path.display(), e);
                return None;
            }
        }

        if let Some(header) = self.header(path).await {
            metadata.extend(header);
        }

        Some(metadata)
    }
}
