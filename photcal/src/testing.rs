//! Shared helpers for unit tests: synthetic frames and FITS writing.

use std::path::{Path, PathBuf};

use fitsio::FitsFile;
use fitsio::images::{ImageDescription, ImageType};
use glam::DVec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::fits::{FrameHeader, FrameImage};
use crate::wcs::Wcs;

/// Route tracing output through the test harness.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub const TEST_RA: f64 = 250.42;
pub const TEST_DEC: f64 = 36.46;

/// In-memory frame with a TAN WCS centred on the image.
#[derive(Debug, Clone)]
pub struct SyntheticFrame {
    pub header: FrameHeader,
    pub pixels: Vec<f64>,
}

impl SyntheticFrame {
    /// Blank frame at 1 arcsec/pixel, EXPTIME 300 s, GAIN 1.
    pub fn new(width: usize, height: usize) -> Self {
        let wcs = Wcs::from_scale_rotation(
            (width as f64 / 2.0, height as f64 / 2.0),
            (TEST_RA, TEST_DEC),
            1.0,
            0.0,
            (width, height),
        );
        let header = FrameHeader {
            naxis1: width,
            naxis2: height,
            cd: wcs.cd,
            crpix: wcs.crpix,
            crval: wcs.crval,
            airmass: None,
            filter: None,
            exptime: Some(300.0),
            gain: Some(1.0),
            rdnoise: None,
            object: None,
        };
        Self {
            header,
            pixels: vec![0.0; width * height],
        }
    }

    pub fn with_airmass(mut self, airmass: f64) -> Self {
        self.header.airmass = Some(airmass);
        self
    }

    pub fn with_filter(mut self, filter: &str) -> Self {
        self.header.filter = Some(filter.to_string());
        self
    }

    pub fn with_exptime(mut self, exptime: f64) -> Self {
        self.header.exptime = Some(exptime);
        self
    }

    pub fn with_sky(mut self, level: f64) -> Self {
        self.pixels.iter_mut().for_each(|p| *p += level);
        self
    }

    /// Add Gaussian read noise from a seeded generator.
    pub fn with_noise(mut self, sigma: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        for p in self.pixels.iter_mut() {
            // Box-Muller
            let u1: f64 = rng.random::<f64>().max(1e-12);
            let u2: f64 = rng.random::<f64>();
            *p += sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        }
        self
    }

    /// Add a circular Gaussian star at the 1-based position (x, y).
    pub fn add_star(&mut self, x: f64, y: f64, sigma: f64, amplitude: f64) {
        render_gaussian(
            &mut self.pixels,
            self.header.naxis1,
            DVec2::new(x, y),
            sigma,
            amplitude,
        );
    }

    pub fn wcs(&self) -> Wcs {
        Wcs::from_header(&self.header)
    }

    pub fn to_image(&self) -> FrameImage {
        FrameImage::from_pixels(self.header.clone(), self.pixels.clone())
    }
}

/// Render a Gaussian of total height `amplitude` centred at a 1-based position.
pub fn render_gaussian(pixels: &mut [f64], width: usize, center: DVec2, sigma: f64, amplitude: f64) {
    let height = pixels.len() / width;
    let radius = (sigma * 5.0).ceil() as i64;
    let cx = center.x.round() as i64;
    let cy = center.y.round() as i64;
    let two_sigma_sq = 2.0 * sigma * sigma;

    for py in (cy - radius)..=(cy + radius) {
        for px in (cx - radius)..=(cx + radius) {
            if px < 1 || py < 1 || px > width as i64 || py > height as i64 {
                continue;
            }
            let dist_sq = (px as f64 - center.x).powi(2) + (py as f64 - center.y).powi(2);
            let idx = (py - 1) as usize * width + (px - 1) as usize;
            pixels[idx] += amplitude * (-dist_sq / two_sigma_sq).exp();
        }
    }
}

/// Write `frame` as a double-precision FITS image with its header keywords.
pub fn write_synthetic_fits(dir: &Path, name: &str, frame: &SyntheticFrame) -> PathBuf {
    let path = dir.join(name);
    let header = &frame.header;

    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &[header.naxis2, header.naxis1],
    };
    let mut fptr = FitsFile::create(&path)
        .with_custom_primary(&description)
        .open()
        .unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    hdu.write_image(&mut fptr, &frame.pixels).unwrap();

    let keys = [
        ("CD1_1", header.cd[0][0]),
        ("CD2_2", header.cd[1][1]),
        ("CRPIX1", header.crpix.0),
        ("CRPIX2", header.crpix.1),
        ("CRVAL1", header.crval.0),
        ("CRVAL2", header.crval.1),
    ];
    for (key, value) in keys {
        hdu.write_key(&mut fptr, key, value).unwrap();
    }
    if header.cd[0][1] != 0.0 {
        hdu.write_key(&mut fptr, "CD1_2", header.cd[0][1]).unwrap();
    }
    if header.cd[1][0] != 0.0 {
        hdu.write_key(&mut fptr, "CD2_1", header.cd[1][0]).unwrap();
    }

    let optional = [
        ("EXPTIME", header.exptime),
        ("GAIN", header.gain),
        ("RDNOISE", header.rdnoise),
        ("AIRMASS", header.airmass),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            hdu.write_key(&mut fptr, key, value).unwrap();
        }
    }
    if let Some(filter) = &header.filter {
        hdu.write_key(&mut fptr, "FILTER", filter.as_str()).unwrap();
    }
    if let Some(object) = &header.object {
        hdu.write_key(&mut fptr, "OBJECT", object.as_str()).unwrap();
    }

    path
}
