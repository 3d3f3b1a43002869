//! FITS frame access: the header keywords the calibration needs and the pixel plane.

use std::path::{Path, PathBuf};

use fitsio::FitsFile;
use fitsio::hdu::{FitsHdu, HduInfo};
use glam::DVec2;
use thiserror::Error;

/// Errors that can occur when reading or updating a FITS frame.
#[derive(Debug, Error)]
pub enum FitsError {
    #[error("Failed to open FITS file '{path}': {source}")]
    Open {
        path: PathBuf,
        source: fitsio::errors::Error,
    },

    #[error("Missing required keyword {key} in '{path}'")]
    MissingKey { path: PathBuf, key: &'static str },

    #[error("Primary HDU of '{path}' is not an image")]
    NotAnImage { path: PathBuf },

    #[error("Unsupported image shape {shape:?} in '{path}'")]
    Shape { path: PathBuf, shape: Vec<usize> },

    #[error("Failed to read pixels of '{path}': {source}")]
    Read {
        path: PathBuf,
        source: fitsio::errors::Error,
    },

    #[error("Failed to write keyword {key} to '{path}': {source}")]
    Write {
        path: PathBuf,
        key: String,
        source: fitsio::errors::Error,
    },
}

/// Header keywords of a calibration frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    /// Image width (NAXIS1)
    pub naxis1: usize,
    /// Image height (NAXIS2)
    pub naxis2: usize,
    /// CD matrix [[CD1_1, CD1_2], [CD2_1, CD2_2]] in degrees/pixel
    pub cd: [[f64; 2]; 2],
    /// Reference pixel (CRPIX1, CRPIX2), 1-based
    pub crpix: (f64, f64),
    /// Reference sky position (CRVAL1, CRVAL2) in degrees
    pub crval: (f64, f64),
    pub airmass: Option<f64>,
    pub filter: Option<String>,
    /// Exposure time in seconds (EXPTIME)
    pub exptime: Option<f64>,
    /// Electrons per ADU (GAIN)
    pub gain: Option<f64>,
    /// Read noise in electrons (RDNOISE)
    pub rdnoise: Option<f64>,
    pub object: Option<String>,
}

impl FrameHeader {
    /// Read the primary header of `path`.
    ///
    /// `CD1_1` and `CD2_2` are required; the off-diagonal terms default to zero.
    /// `PV*` distortion keywords are not interpreted.
    pub fn read(path: &Path) -> Result<Self, FitsError> {
        let mut fptr = open(path)?;
        let hdu = primary(&mut fptr, path)?;
        Self::from_hdu(&hdu, &mut fptr, path)
    }

    fn from_hdu(hdu: &FitsHdu, fptr: &mut FitsFile, path: &Path) -> Result<Self, FitsError> {
        let (width, height) = image_size(hdu, path)?;

        let required = |fptr: &mut FitsFile, key: &'static str| -> Result<f64, FitsError> {
            hdu.read_key::<f64>(fptr, key)
                .map_err(|_| FitsError::MissingKey {
                    path: path.to_path_buf(),
                    key,
                })
        };

        let cd11 = required(fptr, "CD1_1")?;
        let cd22 = required(fptr, "CD2_2")?;
        let cd12 = read_key_optional::<f64>(hdu, fptr, "CD1_2").unwrap_or(0.0);
        let cd21 = read_key_optional::<f64>(hdu, fptr, "CD2_1").unwrap_or(0.0);
        let crpix = (required(fptr, "CRPIX1")?, required(fptr, "CRPIX2")?);
        let crval = (required(fptr, "CRVAL1")?, required(fptr, "CRVAL2")?);

        Ok(Self {
            naxis1: width,
            naxis2: height,
            cd: [[cd11, cd12], [cd21, cd22]],
            crpix,
            crval,
            airmass: read_key_optional(hdu, fptr, "AIRMASS"),
            filter: read_key_optional::<String>(hdu, fptr, "FILTER")
                .map(|f| f.trim().to_string()),
            exptime: read_key_optional(hdu, fptr, "EXPTIME"),
            gain: read_key_optional(hdu, fptr, "GAIN"),
            rdnoise: read_key_optional(hdu, fptr, "RDNOISE"),
            object: read_key_optional(hdu, fptr, "OBJECT"),
        })
    }
}

/// A calibration frame: header plus the pixel plane as f64, row-major, 0-based.
#[derive(Debug, Clone)]
pub struct FrameImage {
    pub path: PathBuf,
    pub header: FrameHeader,
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<f64>,
}

impl FrameImage {
    pub fn load(path: &Path) -> Result<Self, FitsError> {
        let mut fptr = open(path)?;
        let hdu = primary(&mut fptr, path)?;
        let header = FrameHeader::from_hdu(&hdu, &mut fptr, path)?;

        let pixels: Vec<f64> = hdu.read_image(&mut fptr).map_err(|source| FitsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let (width, height) = (header.naxis1, header.naxis2);
        if pixels.len() != width * height {
            return Err(FitsError::Shape {
                path: path.to_path_buf(),
                shape: vec![pixels.len()],
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            header,
            width,
            height,
            pixels,
        })
    }

    /// Build a frame from raw pixels (used for synthetic data).
    pub fn from_pixels(header: FrameHeader, pixels: Vec<f64>) -> Self {
        let (width, height) = (header.naxis1, header.naxis2);
        assert_eq!(pixels.len(), width * height, "Pixel count mismatch");
        Self {
            path: PathBuf::new(),
            header,
            width,
            height,
            pixels,
        }
    }

    /// Pixel value at 0-based column `x`, row `y`.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.pixels[y * self.width + x]
    }

    /// Pixels whose centres lie between `inner` and `outer` (inclusive) from a
    /// 1-based `center`, returned with their 1-based positions.
    ///
    /// Pixels outside the frame are skipped.
    pub fn ring_pixels(&self, center: DVec2, inner: f64, outer: f64) -> Vec<(DVec2, f64)> {
        let reach = outer.ceil() as i64 + 1;
        let cx = center.x.round() as i64;
        let cy = center.y.round() as i64;

        let x_min = (cx - reach).max(1);
        let x_max = (cx + reach).min(self.width as i64);
        let y_min = (cy - reach).max(1);
        let y_max = (cy + reach).min(self.height as i64);

        let mut pixels = Vec::new();
        for y in y_min..=y_max {
            for x in x_min..=x_max {
                let pos = DVec2::new(x as f64, y as f64);
                let distance = pos.distance(center);
                if distance >= inner && distance <= outer {
                    pixels.push((pos, self.get(x as usize - 1, y as usize - 1)));
                }
            }
        }
        pixels
    }

    /// Display name used in photometry tables.
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("frame")
            .to_string()
    }
}

/// Write floating point keywords into the primary header of `path`.
///
/// Existing keywords with the same name are overwritten.
pub fn write_calibration_keywords(path: &Path, keys: &[(String, f64)]) -> Result<(), FitsError> {
    let mut fptr = FitsFile::edit(path).map_err(|source| FitsError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let hdu = primary(&mut fptr, path)?;

    for (key, value) in keys {
        hdu.write_key(&mut fptr, key, *value)
            .map_err(|source| FitsError::Write {
                path: path.to_path_buf(),
                key: key.clone(),
                source,
            })?;
    }
    tracing::debug!("Wrote {} keywords to {}", keys.len(), path.display());
    Ok(())
}

fn open(path: &Path) -> Result<FitsFile, FitsError> {
    FitsFile::open(path).map_err(|source| FitsError::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn primary(fptr: &mut FitsFile, path: &Path) -> Result<FitsHdu, FitsError> {
    fptr.primary_hdu().map_err(|source| FitsError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// (width, height) of a 2-D primary image.
fn image_size(hdu: &FitsHdu, path: &Path) -> Result<(usize, usize), FitsError> {
    match &hdu.info {
        // shape is in reverse NAXIS order: [NAXIS2, NAXIS1]
        HduInfo::ImageInfo { shape, .. } => match shape.as_slice() {
            [height, width] => Ok((*width, *height)),
            _ => Err(FitsError::Shape {
                path: path.to_path_buf(),
                shape: shape.clone(),
            }),
        },
        _ => Err(FitsError::NotAnImage {
            path: path.to_path_buf(),
        }),
    }
}

fn read_key_optional<T: fitsio::headers::ReadsKey>(
    hdu: &FitsHdu,
    fptr: &mut FitsFile,
    key: &str,
) -> Option<T> {
    hdu.read_key(fptr, key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SyntheticFrame, write_synthetic_fits};

    #[test]
    fn test_read_header_keywords() {
        let dir = tempfile::tempdir().unwrap();
        let frame = SyntheticFrame::new(64, 48).with_airmass(1.21).with_filter("odi_g");
        let path = write_synthetic_fits(dir.path(), "field_g.fits", &frame);

        let header = FrameHeader::read(&path).unwrap();
        assert_eq!(header.naxis1, 64);
        assert_eq!(header.naxis2, 48);
        assert_eq!(header.filter.as_deref(), Some("odi_g"));
        assert!((header.airmass.unwrap() - 1.21).abs() < 1e-9);
        assert!((header.cd[0][0] - frame.header.cd[0][0]).abs() < 1e-15);
        assert!(header.cd[0][1].abs() < 1e-15, "CD1_2 defaults to zero");
        assert!((header.exptime.unwrap() - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_airmass_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let frame = SyntheticFrame::new(32, 32).with_filter("odi_i");
        let path = write_synthetic_fits(dir.path(), "field_i.fits", &frame);

        let header = FrameHeader::read(&path).unwrap();
        assert!(header.airmass.is_none());
    }

    #[test]
    fn test_load_pixels_row_major() {
        let dir = tempfile::tempdir().unwrap();
        let mut frame = SyntheticFrame::new(16, 8);
        frame.pixels[3 * 16 + 5] = 1234.0;
        let path = write_synthetic_fits(dir.path(), "px_g.fits", &frame);

        let image = FrameImage::load(&path).unwrap();
        assert_eq!((image.width, image.height), (16, 8));
        assert!((image.get(5, 3) - 1234.0).abs() < 1e-9);
        assert_eq!(image.name(), "px_g");
    }

    #[test]
    fn test_ring_pixels_clip_to_frame() {
        let frame = SyntheticFrame::new(10, 10).to_image();

        let disk = frame.ring_pixels(DVec2::new(5.0, 5.0), 0.0, 1.0);
        assert_eq!(disk.len(), 5);

        // corner: only the in-frame quarter of the disk remains
        let corner = frame.ring_pixels(DVec2::new(1.0, 1.0), 0.0, 1.0);
        assert_eq!(corner.len(), 3);

        let ring = frame.ring_pixels(DVec2::new(5.0, 5.0), 1.5, 2.0);
        assert!(ring.iter().all(|(p, _)| {
            let d = p.distance(DVec2::new(5.0, 5.0));
            (1.5..=2.0).contains(&d)
        }));
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_write_calibration_keywords() {
        let dir = tempfile::tempdir().unwrap();
        let frame = SyntheticFrame::new(16, 16);
        let path = write_synthetic_fits(dir.path(), "kw_g.fits", &frame);

        write_calibration_keywords(&path, &[("F_ZP_G".to_string(), 26.125)]).unwrap();

        let mut fptr = FitsFile::open(&path).unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        let zp: f64 = hdu.read_key(&mut fptr, "F_ZP_G").unwrap();
        assert!((zp - 26.125).abs() < 1e-9);
    }

    #[test]
    fn test_open_missing_file() {
        let err = FrameHeader::read(Path::new("/no/such/frame.fits")).unwrap_err();
        assert!(matches!(err, FitsError::Open { .. }));
    }
}
