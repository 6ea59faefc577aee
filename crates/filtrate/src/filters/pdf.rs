//! PDF preview filter.

use super::{convert_binary, ensure_parent_dir, has_suffix, run_command, thumbnail_paths};
use crate::Result;
use crate::plugins::{FilterArgs, FilterContext, MetadataFilter, Plugin};
use crate::types::ExtractedMetadata;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Rasterizes the first page of a PDF to PNG with ImageMagick.
///
/// Takes an optional `convert_path` keyword argument; without it `convert`
/// is looked up on `PATH` the first time a PDF is processed.
#[derive(Debug, Clone)]
pub struct PdfImageFilter {
    convert: Option<PathBuf>,
    store: PathBuf,
}

impl PdfImageFilter {
    pub fn new(store: impl Into<PathBuf>) -> Self {
        Self {
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

        let mut filter = Self::new(context.metadata_store_path().to_path_buf());
        filter.convert = args.string("convert_path", Some(0))?.map(PathBuf::from);
        Ok(filter)
    }

    async fn render(&self, file_id: i64, path: &Path, source_uri: &str) -> Result<Option<ExtractedMetadata>> {
        let (thumb_rel, thumb_abs) = thumbnail_paths(&self.store, file_id, path, source_uri, "png", false);
        ensure_parent_dir(&thumb_abs).await?;

        let convert = convert_binary(self.convert.as_deref())?;
        let first_page = format!("{}[0]", path.display());
        let target = thumb_abs.to_string_lossy().into_owned();
        run_command(&convert, &[first_page.as_str(), target.as_str()], None).await;

        if !tokio::fs::try_exists(&thumb_abs).await? {
            return Ok(None);
        }

        let mut metadata = ExtractedMetadata::new();
        metadata.insert("previewImage".to_string(), thumb_rel.into());
        Ok(Some(metadata))
    }
}

impl Plugin for PdfImageFilter {
    fn name(&self) -> &str {
        "pdf-image-filter"
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
}

#[async_trait]
impl MetadataFilter for PdfImageFilter {
    async fn apply(&self, file_id: i64, path: &Path, source_uri: &str) -> Option<ExtractedMetadata> {
        if !has_suffix(path, &[".pdf"]) {
            return None;
        }

        tracing::info!("Applying PDF filter to {}...", path.display());

        self.render(file_id, path, source_uri).await.unwrap_or_else(|e| {
            tracing::error!("PDF filter failed for {}: {}", path.display(), e);
            None
        })
    }
}
