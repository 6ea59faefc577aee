//! Microscopy image filter backed by Bio-Formats.
//!
//! `showinf -omexml-only` dumps the OME-XML description of the file and
//! `bfconvert` writes the first plane of series 0 to PNG; ImageMagick then
//! stretches its contrast and scales it into a 256 px box. Both Bio-Formats
//! tools start a JVM, whose heap is capped through `BF_MAX_MEM`.

use super::exec::{BfTools, CommandOptions, bftools, run_command, run_command_with};
use super::{convert_binary, ensure_parent_dir, has_suffix, thumbnail_paths};
use crate::plugins::{FilterArgs, FilterContext, MetadataFilter, Plugin};
use crate::types::{ExtractedMetadata, MetadataValue};
use crate::{FiltrateError, Result};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_MAX_HEAP_SIZE: &str = "4G";

/// Longest side of the preview image, in pixels.
pub const PREVIEW_SIZE: u32 = 256;

/// Suffixes handed to Bio-Formats.
pub const READABLE_SUFFIXES: &[&str] = &[
    ".tif", ".tiff", ".btf", ".czi", ".dv", ".ics", ".ids", ".ims", ".lei", ".lif", ".lsm", ".nd2", ".oib",
    ".oif", ".sld", ".stk", ".vsi", ".zvi",
];

const PIXEL_EXCLUDED: &[&str] = &["id", "significantbits", "bigendian", "interleaved"];

const CHANNEL_EXCLUDED: &[&str] = &[
    "color",
    "id",
    "contrastmethod",
    "fluor",
    "ndfilter",
    "illuminationtype",
    "name",
    "pockelcellsetting",
    "acquisitionmode",
];

/// OME metadata and preview for microscopy formats.
///
/// # Arguments
///
/// - `bftools_path` (keyword, or first positional): directory holding
///   `showinf` and `bfconvert`; both are looked up on `PATH` when absent
/// - `convert_path` (keyword): ImageMagick `convert`; looked up on `PATH` when absent
/// - `max_heap_size` (keyword): JVM heap limit, default `4G`
#[derive(Debug, Clone)]
pub struct BioformatsFilter {
    tools: Option<BfTools>,
    convert: Option<PathBuf>,
    max_heap_size: String,
    store: PathBuf,
}

impl BioformatsFilter {
    pub fn new(store: impl Into<PathBuf>) -> Self {
        Self {
            tools: None,
            convert: None,
            max_heap_size: DEFAULT_MAX_HEAP_SIZE.to_string(),
            store: store.into(),
        }
    }

    pub fn with_tools(mut self, tools: BfTools) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_convert(mut self, convert: impl Into<PathBuf>) -> Self {
        self.convert = Some(convert.into());
        self
    }

    pub fn from_args(args: &FilterArgs<'_>, context: &FilterContext) -> Result<Self> {
        args.output_name()?;
        args.output_schema()?;

        let mut filter = Self::new(context.metadata_store_path().to_path_buf());
        filter.tools = args
            .string("bftools_path", Some(0))?
            .map(|dir| BfTools::in_dir(Path::new(&dir)));
        filter.convert = args.string("convert_path", None)?.map(PathBuf::from);
        filter.max_heap_size = args.string_or("max_heap_size", None, DEFAULT_MAX_HEAP_SIZE)?;
        Ok(filter)
    }

    fn tools(&self) -> Result<Arc<BfTools>> {
        match &self.tools {
            Some(tools) => Ok(Arc::new(tools.clone())),
            None => bftools(),
        }
    }

    fn jvm_options(&self) -> CommandOptions {
        CommandOptions {
            env: vec![("BF_MAX_MEM".to_string(), self.max_heap_size.clone())],
            ..CommandOptions::default()
        }
    }

    async fn extract(&self, file_id: i64, path: &Path, source_uri: &str) -> Result<Option<ExtractedMetadata>> {
        let tools = self.tools()?;
        let options = self.jvm_options();

        let args = [
            OsStr::new("-nopix"),
            OsStr::new("-novalid"),
            OsStr::new("-no-upgrade"),
            OsStr::new("-omexml-only"),
            path.as_os_str(),
        ];
        let Some(output) = run_command_with(&tools.showinf, &args, &options).await else {
            tracing::error!("Unable to read OME metadata from {}", path.display());
            return Ok(None);
        };

        let Some(mut metadata) = parse_ome_xml(&output)?.into_iter().next() else {
            tracing::error!("No image series described in {}", path.display());
            return Ok(None);
        };

        let (thumb_rel, thumb_abs) = series_preview_paths(&self.store, file_id, path, source_uri, 0);
        if self.preview(&tools, &options, path, &thumb_abs).await? {
            metadata.insert("previewImage".to_string(), thumb_rel.into());
        } else {
            tracing::warn!("No preview generated for {}", path.display());
        }

        Ok(Some(metadata))
    }

    /// Render series 0 to `thumb_abs`, returning whether it was written.
    async fn preview(&self, tools: &BfTools, options: &CommandOptions, path: &Path, thumb_abs: &Path) -> Result<bool> {
        let workdir = tempfile::tempdir()?;
        let plane = workdir.path().join("series0.png");

        let args = [
            OsStr::new("-overwrite"),
            OsStr::new("-series"),
            OsStr::new("0"),
            OsStr::new("-channel"),
            OsStr::new("0"),
            OsStr::new("-timepoint"),
            OsStr::new("0"),
            OsStr::new("-z"),
            OsStr::new("0"),
            path.as_os_str(),
            plane.as_os_str(),
        ];
        run_command_with(&tools.bfconvert, &args, options).await;
        if !tokio::fs::try_exists(&plane).await? {
            return Ok(false);
        }

        ensure_parent_dir(thumb_abs).await?;
        let convert = convert_binary(self.convert.as_deref())?;
        let geometry = format!("{}x{}", PREVIEW_SIZE, PREVIEW_SIZE);
        run_command(
            &convert,
            &[
                plane.as_os_str(),
                OsStr::new("-auto-level"),
                OsStr::new("-resize"),
                OsStr::new(&geometry),
                thumb_abs.as_os_str(),
            ],
            None,
        )
        .await;

        Ok(tokio::fs::try_exists(thumb_abs).await?)
    }
}

/// `<dir>/<file_id>/<stem>_s<series>.png`, relative and under `store`.
fn series_preview_paths(store: &Path, file_id: i64, path: &Path, source_uri: &str, series: usize) -> (String, PathBuf) {
    let (relative, _) = thumbnail_paths(store, file_id, path, source_uri, "png", true);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = format!("{}_s{}.png", stem, series);

    let relative = match relative.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, file_name),
        None => file_name,
    };
    let absolute = store.join(&relative);
    (relative, absolute)
}

/// Per-series tags from an OME-XML document.
///
/// Each `Image` yields `id`, `name`, its `Pixels` attributes (lower-cased,
/// storage details dropped) and one `Channel <n>: <value>` list entry per
/// channel attribute.
pub fn parse_ome_xml(output: &str) -> Result<Vec<ExtractedMetadata>> {
    // showinf may print log lines ahead of the document
    let start = output
        .find("<?xml")
        .or_else(|| output.find("<OME"))
        .ok_or_else(|| FiltrateError::validation("showinf output holds no OME-XML document"))?;

    let doc = roxmltree::Document::parse(&output[start..])
        .map_err(|e| FiltrateError::serialization_with_source("Failed to parse OME-XML", e))?;

    let images = doc
        .root_element()
        .children()
        .filter(|node| node.is_element() && node.tag_name().name() == "Image");

    let mut series = Vec::new();
    for image in images {
        let mut metadata = ExtractedMetadata::new();
        metadata.insert("id".to_string(), image.attribute("ID").unwrap_or_default().into());
        metadata.insert("name".to_string(), image.attribute("Name").unwrap_or_default().into());

        let pixels = image
            .children()
            .filter(|node| node.is_element() && node.tag_name().name() == "Pixels");
        for pixel in pixels {
            for attr in pixel.attributes() {
                let key = attr.name().to_lowercase();
                if !PIXEL_EXCLUDED.contains(&key.as_str()) {
                    metadata.insert(key, attr.value().into());
                }
            }

            let channels = pixel
                .children()
                .filter(|node| node.is_element() && node.tag_name().name() == "Channel");
            for (index, channel) in channels.enumerate() {
                for attr in channel.attributes() {
                    let key = attr.name().to_lowercase();
                    if CHANNEL_EXCLUDED.contains(&key.as_str()) {
                        continue;
                    }
                    let entry = format!("Channel {}: {}", index, attr.value());
                    match metadata.entry(key).or_insert_with(|| MetadataValue::List(Vec::new())) {
                        MetadataValue::List(values) => values.push(entry),
                        MetadataValue::Text(_) => {}
                    }
                }
            }
        }

        series.push(metadata);
    }

    Ok(series)
}

impl Plugin for BioformatsFilter {
    fn name(&self) -> &str {
        "bioformats-filter"
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
        "Extracts OME metadata and a preview from microscopy images with Bio-Formats"
    }
}

#[async_trait]
impl MetadataFilter for BioformatsFilter {
    async fn apply(&self, file_id: i64, path: &Path, source_uri: &str) -> Option<ExtractedMetadata> {
        if !has_suffix(path, READABLE_SUFFIXES) {
            return None;
        }

        tracing::info!("Applying Bioformats filter to {}...", path.display());

        self.extract(file_id, path, source_uri).await.unwrap_or_else(|e| {
            tracing::error!("Bioformats filter failed for {}: {}", path.display(), e);
            None
        })
    }
}
