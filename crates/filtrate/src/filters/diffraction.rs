//! X-ray diffraction image filter.
//!
//! Metadata comes from the CCP4 `diffdump` tool, which prints one
//! `Term : value` line per header field. The preview is produced by
//! `diff2jpeg`, which writes `<stem>.jpg` next to its input; it runs on a copy
//! inside a temporary directory so the data directory is never written to.

use super::exec::{CommandOptions, run_command_with};
use super::{ensure_parent_dir, has_suffix, thumbnail_paths};
use crate::Result;
use crate::plugins::{FilterArgs, FilterContext, MetadataFilter, Plugin};
use crate::types::ExtractedMetadata;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Header metadata and JPEG preview for `.img` / `.osc` diffraction images.
///
/// Requires the `diffdump_path` and `diff2jpeg_path` keyword arguments
/// (or first and second positional). Each tool runs from its own directory
/// with that directory prepended to `LD_LIBRARY_PATH`.
#[derive(Debug, Clone)]
pub struct DiffractionImageFilter {
    diffdump_path: PathBuf,
    diff2jpeg_path: PathBuf,
    store: PathBuf,
}

impl DiffractionImageFilter {
    pub fn new(
        diffdump_path: impl Into<PathBuf>,
        diff2jpeg_path: impl Into<PathBuf>,
        store: impl Into<PathBuf>,
    ) -> Self {
        Self {
            diffdump_path: diffdump_path.into(),
            diff2jpeg_path: diff2jpeg_path.into(),
            store: store.into(),
        }
    }

    pub fn from_args(args: &FilterArgs<'_>, context: &FilterContext) -> Result<Self> {
        args.output_name()?;
        args.output_schema()?;

        Ok(Self::new(
            args.require_string("diffdump_path", Some(0))?,
            args.require_string("diff2jpeg_path", Some(1))?,
            context.metadata_store_path().to_path_buf(),
        ))
    }

    async fn header(&self, path: &Path) -> ExtractedMetadata {
        let options = tool_options(&self.diffdump_path);
        match run_command_with(&self.diffdump_path, &[path.as_os_str()], &options).await {
            Some(output) => parse_diffdump_output(&output),
            None => ExtractedMetadata::new(),
        }
    }

    /// Render the preview, returning whether `thumb_abs` was written.
    async fn preview(&self, path: &Path, thumb_abs: &Path) -> Result<bool> {
        let workdir = tempfile::tempdir()?;
        let file_name = path
            .file_name()
            .ok_or_else(|| crate::FiltrateError::validation(format!("{} has no file name", path.display())))?;
        let copy = workdir.path().join(file_name);
        tokio::fs::copy(path, &copy).await?;

        let options = tool_options(&self.diff2jpeg_path);
        let Some(output) = run_command_with(&self.diff2jpeg_path, &[copy.as_os_str()], &options).await else {
            return Ok(false);
        };
        if output.starts_with("Exception") {
            tracing::error!("diff2jpeg failed for {}: {}", path.display(), output.trim());
            return Ok(false);
        }

        let rendered = copy.with_extension("jpg");
        if !tokio::fs::try_exists(&rendered).await? {
            tracing::error!("diff2jpeg wrote no image for {}", path.display());
            return Ok(false);
        }

        ensure_parent_dir(thumb_abs).await?;
        tokio::fs::copy(&rendered, thumb_abs).await?;
        Ok(true)
    }
}

fn tool_options(tool: &Path) -> CommandOptions {
    let dir = tool.parent().map(Path::to_path_buf);
    CommandOptions {
        library_path: dir.iter().cloned().collect(),
        cwd: dir,
        ..CommandOptions::default()
    }
}

/// Parse `diffdump` output into camelCase tags.
///
/// Units are stripped and paired values (beam centre, image size, pixel
/// size, oscillation range) are split into two tags. Unknown terms are
/// skipped.
pub fn parse_diffdump_output(output: &str) -> ExtractedMetadata {
    let mut metadata = ExtractedMetadata::new();

    for line in output.lines() {
        let Some((term, value)) = line.split_once(':') else {
            continue;
        };
        let term: String = term.chars().filter(|c| *c != ' ').collect();
        let value = value.trim();

        let mut put = |tag: &str, value: &str| {
            metadata.insert(tag.to_string(), value.trim().to_string().into());
        };

        match term.as_str() {
            "Imagetype" => put("imageType", value),
            "Collectiondate" => put("collectionDate", value),
            "DetectorS/N" => put("detectorSN", value),
            "Exposuretime" => put("exposureTime", strip_unit(value, "s")),
            "Wavelength" => put("wavelength", strip_unit(value, "Ang")),
            "Distancetodetector" => put("detectorDistance", strip_unit(value, "mm")),
            "TwoThetavalue" => put("twoTheta", strip_unit(value, "deg")),
            "Beamcenter" => put_pair(&mut put, ["directBeamXPos", "directBeamYPos"], value, "mm"),
            "ImageSize" => put_pair(&mut put, ["imageSizeX", "imageSizeY"], value, "px"),
            "PixelSize" => put_pair(&mut put, ["pixelSizeX", "pixelSizeY"], value, "mm"),
            "Oscillation(phi)" => {
                if let Some((start, end)) = value.split_once("->") {
                    put("oscillationRangeStart", start);
                    put("oscillationRangeEnd", strip_unit(end.trim(), "deg"));
                }
            }
            _ => tracing::trace!("no {} found", term),
        }
    }

    metadata
}

fn strip_unit<'a>(value: &'a str, unit: &str) -> &'a str {
    value.strip_suffix(unit).map(str::trim_end).unwrap_or(value)
}

/// `(x unit, y unit)` into two tags.
fn put_pair(put: &mut impl FnMut(&str, &str), tags: [&str; 2], value: &str, unit: &str) {
    let inner = value.trim_start_matches('(').trim_end_matches(')');
    if let Some((x, y)) = inner.split_once(',') {
        put(tags[0], strip_unit(x.trim(), unit));
        put(tags[1], strip_unit(y.trim(), unit));
    }
}

impl Plugin for DiffractionImageFilter {
    fn name(&self) -> &str {
        "diffraction-image-filter"
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
impl MetadataFilter for DiffractionImageFilter {
    async fn apply(&self, file_id: i64, path: &Path, source_uri: &str) -> Option<ExtractedMetadata> {
        if !has_suffix(path, &[".img", ".osc"]) {
            return None;
        }

        tracing::info!("Applying Diffraction Image filter to {}...", path.display());

        let mut metadata = self.header(path).await;

        let (thumb_rel, thumb_abs) = thumbnail_paths(&self.store, file_id, path, source_uri, "jpg", true);
        match self.preview(path, &thumb_abs).await {
            Ok(true) => {
                metadata.insert("previewImage".to_string(), thumb_rel.into());
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!("Diffraction Image filter failed for {}: {}", path.display(), e);
                return None;
            }
        }

        Some(metadata)
    }
}
