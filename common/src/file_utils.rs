//! File utility functions for FITS discovery and sidecar naming.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Supported FITS file extensions.
pub const FITS_EXTENSIONS: &[&str] = &["fit", "fits"];

/// Returns paths to all files in a directory matching the given extensions.
/// Extensions are matched case-insensitively. The result is sorted by path.
pub fn files_with_extensions(dir: &Path, extensions: &[&str]) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|path| {
            if !path.is_file() {
                return false;
            }
            let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
            extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Returns paths to all FITS images in the given directory.
pub fn fits_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    files_with_extensions(dir, FITS_EXTENSIONS)
}

/// Path of a sidecar file: the image path with its FITS extension replaced by `suffix`.
///
/// `M13_g.fits` with suffix `.sdss` becomes `M13_g.sdss`; `_cal.sdssphot`
/// gives `M13_g_cal.sdssphot`.
pub fn sidecar_path(image: &Path, suffix: &str) -> PathBuf {
    let stem = image
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    image.with_file_name(format!("{stem}{suffix}"))
}

/// Field root of an image: the file stem up to the first underscore.
///
/// Output products shared by an image pair (`<root>_help.txt`, plots) are named after it.
pub fn field_root(image: &Path) -> String {
    let stem = image
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    stem.split('_').next().unwrap_or(stem).to_string()
}

/// Path of a product named after the field root, next to `image`.
pub fn field_product_path(image: &Path, suffix: &str) -> PathBuf {
    image.with_file_name(format!("{}{}", field_root(image), suffix))
}

/// Name of the directory the process runs in, upper-cased.
///
/// Image pairs are conventionally stored as `<DIR>_g.fits` and `<DIR>_i.fits`.
pub fn directory_field_name(dir: &Path) -> Option<String> {
    dir.file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_replaces_extension() {
        let image = Path::new("/data/m13/M13_g.fits");
        assert_eq!(
            sidecar_path(image, ".sdss"),
            PathBuf::from("/data/m13/M13_g.sdss")
        );
        assert_eq!(
            sidecar_path(image, "_cal.sdssphot"),
            PathBuf::from("/data/m13/M13_g_cal.sdssphot")
        );
    }

    #[test]
    fn field_root_stops_at_first_underscore() {
        assert_eq!(field_root(Path::new("AGC198606_g_sh.fits")), "AGC198606");
        assert_eq!(field_root(Path::new("plain.fits")), "plain");
        assert_eq!(
            field_product_path(Path::new("/x/M13_i.fits"), "_help.txt"),
            PathBuf::from("/x/M13_help.txt")
        );
    }

    #[test]
    fn directory_name_is_upper_cased() {
        assert_eq!(
            directory_field_name(Path::new("/obs/agc198606")),
            Some("AGC198606".to_string())
        );
    }

    #[test]
    fn lists_fits_files_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a_g.fits", "b_i.FIT", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let files = fits_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a_g.fits", "b_i.FIT"]);
    }

    #[test]
    fn missing_directory_is_empty() {
        let files = fits_files(Path::new("/definitely/not/here")).unwrap();
        assert!(files.is_empty());
    }
}
