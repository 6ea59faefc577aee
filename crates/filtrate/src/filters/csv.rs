//! CSV preview filter.
//!
//! Renders the sheet to PDF with Gnumeric's `ssconvert`, then rasterizes the
//! first page to PNG with ImageMagick.

use super::{convert_binary, ensure_parent_dir, has_suffix, run_command, thumbnail_paths};
use crate::Result;
use crate::plugins::{FilterArgs, FilterContext, MetadataFilter, Plugin};
use crate::types::ExtractedMetadata;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Preview image generator for comma-separated value files.
///
/// # Arguments
///
/// - `ssconvert` (keyword, or first positional): path of the ssconvert binary, required
/// - `convert_path` (keyword): ImageMagick `convert`; looked up on `PATH` when absent
#[derive(Debug, Clone)]
pub struct CsvImageFilter {
    ssconvert: PathBuf,
    convert: Option<PathBuf>,
    store: PathBuf,
}

impl CsvImageFilter {
    pub fn new(ssconvert: impl Into<PathBuf>, store: impl Into<PathBuf>) -> Self {
        Self {
            ssconvert: ssconvert.into(),
            convert: None,
            store: store.into(),
        }
    }

    pub fn with_convert(mut self, convert: impl Into<PathBuf>) -> Self {
        self.convert = Some(convert.into());
        self
    }

    pub fn from_args(args: &FilterArgs<'_>, context: &FilterContext) -> Result<Self> {
        args.output_name()?;
        args.output_schema()?;

        let mut filter = Self::new(
            args.require_string("ssconvert", Some(0))?,
            context.metadata_store_path().to_path_buf(),
        );
        filter.convert = args.string("convert_path", None)?.map(PathBuf::from);
        Ok(filter)
    }

    async fn render(&self, file_id: i64, path: &Path, source_uri: &str) -> Result<Option<ExtractedMetadata>> {
        let (thumb_rel, thumb_abs) = thumbnail_paths(&self.store, file_id, path, source_uri, "png", false);
        ensure_parent_dir(&thumb_abs).await?;

        let pdf_abs = thumb_abs.with_extension("pdf");
        run_command(&self.ssconvert, &[path.as_os_str(), pdf_abs.as_os_str()], None).await;

        if tokio::fs::try_exists(&pdf_abs).await? {
            let convert = convert_binary(self.convert.as_deref())?;
            let first_page = format!("{}[0]", pdf_abs.display());
            let target = thumb_abs.to_string_lossy().into_owned();
            run_command(
                &convert,
                &[
                    "-flatten",
                    "-density",
                    "300",
                    "-background",
                    "white",
                    first_page.as_str(),
                    target.as_str(),
                ],
                None,
            )
            .await;
            tokio::fs::remove_file(&pdf_abs).await?;
        } else {
            tracing::error!("Can't find PDF file {}", pdf_abs.display());
        }

        if !tokio::fs::try_exists(&thumb_abs).await? {
            return Ok(None);
        }

        let mut metadata = ExtractedMetadata::new();
        metadata.insert("previewImage".to_string(), thumb_rel.into());
        Ok(Some(metadata))
    }
}

impl Plugin for CsvImageFilter {
    fn name(&self) -> &str {
        "csv-image-filter"
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
        "Renders a PNG preview of CSV files via ssconvert and ImageMagick"
    }
}

#[async_trait]
impl MetadataFilter for CsvImageFilter {
    async fn apply(&self, file_id: i64, path: &Path, source_uri: &str) -> Option<ExtractedMetadata> {
        if !has_suffix(path, &[".csv"]) {
            return None;
        }

        tracing::info!("Applying CSV filter to {}...", path.display());

        match self.render(file_id, path, source_uri).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::error!("CSV filter failed for {}: {}", path.display(), e);
                None
            }
        }
    }
}
