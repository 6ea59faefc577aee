//! Built-in metadata filters.
//!
//! Each filter shells out to an external tool to render a preview image
//! and/or dump format metadata:
//!
//! | Reference | Tools | Tags |
//! | --- | --- | --- |
//! | `filtrate.filters.csv.CsvImageFilter` | ssconvert, ImageMagick | `previewImage` |
//! | `filtrate.filters.pdf.PdfImageFilter` | ImageMagick | `previewImage` |
//! | `filtrate.filters.fcs.FcsImageFilter` | fcsplot, showinf | `previewImage`, `file`, `date`, `parametersAndStainsTable` |
//! | `filtrate.filters.diffraction.DiffractionImageFilter` | diffdump, diff2jpeg | `previewImage` plus detector terms |
//! | `filtrate.filters.bioformats.BioformatsFilter` | showinf, bfconvert, ImageMagick | `previewImage`, `id`, `name` plus OME pixel and channel attributes |
//!
//! Preview images land under the metadata store at the location computed by
//! [`thumbnail_paths`].

pub mod bioformats;
pub mod csv;
pub mod diffraction;
pub mod exec;
pub mod fcs;
pub mod pdf;

pub use exec::{CommandOptions, run_command, run_command_with};

use crate::Result;
use crate::plugins::{FilterArgs, FilterContext, MetadataFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The closed set of filter kinds shipped with the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFilter {
    CsvImage,
    PdfImage,
    FcsImage,
    DiffractionImage,
    Bioformats,
}

impl BuiltinFilter {
    pub const ALL: [BuiltinFilter; 5] = [
        BuiltinFilter::CsvImage,
        BuiltinFilter::PdfImage,
        BuiltinFilter::FcsImage,
        BuiltinFilter::DiffractionImage,
        BuiltinFilter::Bioformats,
    ];

    /// Module path the filter is registered under.
    pub fn module(self) -> &'static str {
        match self {
            BuiltinFilter::CsvImage => "filtrate.filters.csv",
            BuiltinFilter::PdfImage => "filtrate.filters.pdf",
            BuiltinFilter::FcsImage => "filtrate.filters.fcs",
            BuiltinFilter::DiffractionImage => "filtrate.filters.diffraction",
            BuiltinFilter::Bioformats => "filtrate.filters.bioformats",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BuiltinFilter::CsvImage => "CsvImageFilter",
            BuiltinFilter::PdfImage => "PdfImageFilter",
            BuiltinFilter::FcsImage => "FcsImageFilter",
            BuiltinFilter::DiffractionImage => "DiffractionImageFilter",
            BuiltinFilter::Bioformats => "BioformatsFilter",
        }
    }

    pub fn reference(self) -> String {
        format!("{}.{}", self.module(), self.symbol())
    }

    pub fn construct(self, args: &FilterArgs<'_>, context: &FilterContext) -> Result<Arc<dyn MetadataFilter>> {
        let filter: Arc<dyn MetadataFilter> = match self {
            BuiltinFilter::CsvImage => Arc::new(csv::CsvImageFilter::from_args(args, context)?),
            BuiltinFilter::PdfImage => Arc::new(pdf::PdfImageFilter::from_args(args, context)?),
            BuiltinFilter::FcsImage => Arc::new(fcs::FcsImageFilter::from_args(args, context)?),
            BuiltinFilter::DiffractionImage => Arc::new(diffraction::DiffractionImageFilter::from_args(args, context)?),
            BuiltinFilter::Bioformats => Arc::new(bioformats::BioformatsFilter::from_args(args, context)?),
        };
        Ok(filter)
    }
}

/// Compute where the preview image of a file goes.
///
/// Returns `(relative, absolute)`. The relative path is
/// `<dir of uri path>/<file_id>/<basename>.<ext>` and is what gets stored as
/// the `previewImage` tag; the absolute path is the relative one under
/// `store`. With `replace_ext` the source extension is dropped from the
/// basename first (`a.img` becomes `a.jpg` rather than `a.img.jpg`).
///
/// # Example
///
/// ```rust
/// use filtrate::filters::thumbnail_paths;
/// use std::path::{Path, PathBuf};
///
/// let (rel, abs) = thumbnail_paths(
///     Path::new("/srv/metadata"),
///     42,
///     Path::new("/data/ds-1/sample.csv"),
///     "file://store/ds-1/sample.csv",
///     "png",
///     false,
/// );
/// assert_eq!(rel, "ds-1/42/sample.csv.png");
/// assert_eq!(abs, PathBuf::from("/srv/metadata/ds-1/42/sample.csv.png"));
/// ```
pub fn thumbnail_paths(
    store: &Path,
    file_id: i64,
    path: &Path,
    source_uri: &str,
    ext: &str,
    replace_ext: bool,
) -> (String, PathBuf) {
    let basename = if replace_ext {
        path.file_stem()
    } else {
        path.file_name()
    }
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_default();

    let uri_path = uri_path(source_uri);
    let dir = uri_path.rfind('/').map(|idx| &uri_path[..idx]).unwrap_or("");
    let dir = dir.trim_start_matches('/');

    let file_name = format!("{}.{}", basename, ext);
    let relative = if dir.is_empty() {
        format!("{}/{}", file_id, file_name)
    } else {
        format!("{}/{}/{}", dir, file_id, file_name)
    };

    let absolute = store.join(&relative);
    (relative, absolute)
}

/// Path component of a URI: scheme and authority removed, query and fragment dropped.
fn uri_path(uri: &str) -> &str {
    let without_scheme = match uri.find("://") {
        Some(idx) => {
            let rest = &uri[idx + 3..];
            rest.find('/').map(|slash| &rest[slash..]).unwrap_or("")
        }
        None => uri,
    };
    let end = without_scheme.find(['?', '#']).unwrap_or(without_scheme.len());
    &without_scheme[..end]
}

/// Case-insensitive check of the file name's suffix.
pub(crate) fn has_suffix(path: &Path, suffixes: &[&str]) -> bool {
    let Some(name) = path.file_name().map(|name| name.to_string_lossy().to_lowercase()) else {
        return false;
    };
    suffixes.iter().any(|suffix| name.ends_with(suffix))
}

/// The explicitly configured `convert`, or the one found on `PATH`.
pub(crate) fn convert_binary(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(exec::imagemagick_convert()?.as_ref().clone()),
    }
}

/// Create the parent directory of `path` if it's missing.
pub(crate) async fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_paths_relative_uri() {
        let (rel, abs) = thumbnail_paths(
            Path::new("/store"),
            7,
            Path::new("/data/exp/ds/image.img"),
            "exp/ds/image.img",
            "jpg",
            true,
        );
        assert_eq!(rel, "exp/ds/7/image.jpg");
        assert_eq!(abs, PathBuf::from("/store/exp/ds/7/image.jpg"));
    }

    #[test]
    fn test_thumbnail_paths_bare_uri() {
        let (rel, abs) = thumbnail_paths(Path::new("/store"), 3, Path::new("/x/a.pdf"), "a.pdf", "png", false);
        assert_eq!(rel, "3/a.pdf.png");
        assert_eq!(abs, PathBuf::from("/store/3/a.pdf.png"));
    }

    #[test]
    fn test_thumbnail_paths_absolute_uri_stays_under_store() {
        let (rel, abs) = thumbnail_paths(Path::new("/store"), 1, Path::new("/x/a.csv"), "/ds/a.csv", "png", false);
        assert_eq!(rel, "ds/1/a.csv.png");
        assert!(abs.starts_with("/store"));
    }

    #[test]
    fn test_uri_path() {
        assert_eq!(uri_path("http://host:8000/a/b.csv?x=1#frag"), "/a/b.csv");
        assert_eq!(uri_path("file://host"), "");
        assert_eq!(uri_path("a/b.csv"), "a/b.csv");
    }

    #[test]
    fn test_has_suffix_ignores_case() {
        assert!(has_suffix(Path::new("/a/B.CSV"), &[".csv"]));
        assert!(has_suffix(Path::new("x.osc"), &[".img", ".osc"]));
        assert!(!has_suffix(Path::new("x.csv.bak"), &[".csv"]));
    }

    #[test]
    fn test_builtin_references_are_unique() {
        let mut refs: Vec<_> = BuiltinFilter::ALL.iter().map(|b| b.reference()).collect();
        refs.sort();
        refs.dedup();
        assert_eq!(refs.len(), BuiltinFilter::ALL.len());
    }
}
