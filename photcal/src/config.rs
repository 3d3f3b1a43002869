//! Configuration types for the calibration pipeline.
//!
//! All tunables are consolidated here. Every struct deserializes with
//! `#[serde(default)]`, so a YAML file only needs the keys it changes:
//!
//! ```yaml
//! cuts:
//!   max_instrumental_err: 0.02
//! extinction:
//!   g: 0.18
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibrate::Band;
use crate::error::{Error, Result};

/// Public SkyServer SQL search endpoint.
pub const SKYSERVER_URL: &str = "http://skyserver.sdss3.org/public/en/tools/search/x_sql.aspx";

// =============================================================================
// Catalog query
// =============================================================================

/// Reference star selection and catalog access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// SkyServer SQL endpoint
    pub endpoint: String,
    /// Faintest accepted g psfMag
    pub faint_limit: f64,
    /// Brightest accepted g psfMag
    pub bright_limit: f64,
    /// Maximum accepted g psfMagErr
    pub max_g_err: f64,
    /// Stars closer than this many pixels to a frame edge are dropped
    pub border: f64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            endpoint: SKYSERVER_URL.to_string(),
            faint_limit: 21.0,
            bright_limit: 16.0,
            max_g_err: 0.1,
            border: 100.0,
        }
    }
}

// =============================================================================
// Stellar profiles
// =============================================================================

/// Radial profile measurement used to estimate the seeing FWHM and peak counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Object radius in pixels for flux and moments
    pub radius: f64,
    /// Gap between the object radius and the sky annulus
    pub buffer: f64,
    /// Width of the sky annulus
    pub width: f64,
    /// Radius of the profile fit
    pub rplot: f64,
    /// Re-centre on the light distribution before measuring
    pub recenter: bool,
    /// Magnitude zero point of the reported profile magnitude
    pub magzero: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            radius: 4.0,
            buffer: 7.0,
            width: 5.0,
            rplot: 15.0,
            recenter: true,
            magzero: 25.0,
        }
    }
}

// =============================================================================
// Aperture photometry
// =============================================================================

/// Aperture photometry parameters. Radii scale with the measured FWHM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotometryConfig {
    /// Aperture radius in units of FWHM
    pub aperture_factor: f64,
    /// Inner sky annulus radius in units of FWHM
    pub annulus_factor: f64,
    /// Sky annulus width in pixels
    pub dannulus: f64,
    /// Centering box width in pixels
    pub cbox: f64,
    /// Maximum centroid shift in pixels before falling back to the input position
    pub maxshift: f64,
    /// Pixels above this value mark the aperture as saturated
    pub datamax: f64,
    /// Magnitude zero point
    pub zmag: f64,
}

impl Default for PhotometryConfig {
    fn default() -> Self {
        Self {
            aperture_factor: 5.0,
            annulus_factor: 6.0,
            dannulus: 10.0,
            cbox: 9.0,
            maxshift: 3.0,
            datamax: 50_000.0,
            zmag: 0.0,
        }
    }
}

// =============================================================================
// Quality cuts
// =============================================================================

/// Star rejection thresholds applied before fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CutConfig {
    /// Maximum instrumental magnitude error in either image
    pub max_instrumental_err: f64,
    /// Maximum catalog magnitude error in either band
    pub max_catalog_err: f64,
    /// Lower bound of the accepted profile peak (colour-term method)
    pub peak_min: f64,
    /// Upper bound of the accepted profile peak (colour-term method)
    pub peak_max: f64,
    /// Offset from the median, in standard deviations, beyond which a star is an outlier
    /// (zero-point method)
    pub outlier_sigma: f64,
}

impl Default for CutConfig {
    fn default() -> Self {
        Self {
            max_instrumental_err: 0.03,
            max_catalog_err: 0.03,
            peak_min: 1_000.0,
            peak_max: 45_000.0,
            outlier_sigma: 1.0,
        }
    }
}

// =============================================================================
// Extinction
// =============================================================================

/// First-order atmospheric extinction coefficients in mag/airmass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtinctionCoefficients {
    pub g: f64,
    pub r: f64,
    pub i: f64,
}

impl Default for ExtinctionCoefficients {
    fn default() -> Self {
        Self {
            g: 0.20,
            r: 0.12,
            i: 0.058,
        }
    }
}

impl ExtinctionCoefficients {
    pub fn for_band(&self, band: Band) -> f64 {
        match band {
            Band::G => self.g,
            Band::R => self.r,
            Band::I => self.i,
        }
    }
}

// =============================================================================
// Fitting
// =============================================================================

/// Confidence band and zero-point map settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Confidence level of the band around each fit
    pub confidence: f64,
    /// Colour grid the band is evaluated on: start, end (exclusive), step
    pub grid_start: f64,
    pub grid_end: f64,
    pub grid_step: f64,
    /// Bins per axis of the per-region zero-point map
    pub zp_map_bins: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            confidence: 0.95,
            grid_start: -1.0,
            grid_end: 3.5,
            grid_step: 0.025,
            zp_map_bins: 3,
        }
    }
}

impl FitConfig {
    /// Colour values the confidence band is evaluated at.
    pub fn grid(&self) -> Vec<f64> {
        // tolerance keeps an exact multiple from gaining an extra point through rounding
        let span = (self.grid_end - self.grid_start) / self.grid_step;
        let n = (span - 1e-9).ceil().max(0.0) as usize;
        (0..n)
            .map(|k| self.grid_start + k as f64 * self.grid_step)
            .collect()
    }
}

// =============================================================================
// Top level
// =============================================================================

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub query: QueryConfig,
    pub profile: ProfileConfig,
    pub photometry: PhotometryConfig,
    pub cuts: CutConfig,
    pub extinction: ExtinctionCoefficients,
    pub fit: FitConfig,
    /// Detector pixel scale used to express FWHM and apertures in arcseconds
    pub pixel_scale_arcsec: f64,
    /// Airmass pair (g, second band) used when the frames carry no AIRMASS keyword
    pub airmass_fallback: Option<[f64; 2]>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            query: QueryConfig::default(),
            profile: ProfileConfig::default(),
            photometry: PhotometryConfig::default(),
            cuts: CutConfig::default(),
            extinction: ExtinctionCoefficients::default(),
            fit: FitConfig::default(),
            pixel_scale_arcsec: 0.11,
            airmass_fallback: None,
        }
    }
}

impl CalibrationConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yml::to_string(self)?)
    }

    /// Reject parameter combinations the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        let q = &self.query;
        if q.bright_limit >= q.faint_limit {
            return Err(Error::Config(format!(
                "bright_limit ({}) must be brighter than faint_limit ({})",
                q.bright_limit, q.faint_limit
            )));
        }
        if q.border < 0.0 || q.max_g_err <= 0.0 {
            return Err(Error::Config(
                "border must be >= 0 and max_g_err > 0".to_string(),
            ));
        }

        let p = &self.profile;
        if p.radius <= 0.0 || p.width <= 0.0 || p.rplot <= 0.0 || p.buffer < 0.0 {
            return Err(Error::Config(
                "profile radius, width and rplot must be positive".to_string(),
            ));
        }

        let ph = &self.photometry;
        if ph.aperture_factor <= 0.0 || ph.annulus_factor <= ph.aperture_factor {
            return Err(Error::Config(format!(
                "annulus_factor ({}) must exceed aperture_factor ({}) > 0",
                ph.annulus_factor, ph.aperture_factor
            )));
        }
        if ph.dannulus <= 0.0 || ph.cbox < 1.0 || ph.maxshift < 0.0 || ph.datamax <= 0.0 {
            return Err(Error::Config(
                "dannulus, cbox and datamax must be positive".to_string(),
            ));
        }

        let c = &self.cuts;
        if c.peak_min >= c.peak_max {
            return Err(Error::Config(format!(
                "peak_min ({}) must be below peak_max ({})",
                c.peak_min, c.peak_max
            )));
        }
        if c.max_instrumental_err <= 0.0 || c.max_catalog_err <= 0.0 || c.outlier_sigma <= 0.0 {
            return Err(Error::Config("error cuts must be positive".to_string()));
        }

        let f = &self.fit;
        if !(f.confidence > 0.0 && f.confidence < 1.0) {
            return Err(Error::Config(format!(
                "confidence must be in (0, 1), got {}",
                f.confidence
            )));
        }
        if f.grid_step <= 0.0 || f.grid_end <= f.grid_start || f.zp_map_bins == 0 {
            return Err(Error::Config(
                "band grid must be increasing with a positive step".to_string(),
            ));
        }

        if self.pixel_scale_arcsec <= 0.0 {
            return Err(Error::Config("pixel_scale_arcsec must be positive".to_string()));
        }
        if let Some([a, b]) = self.airmass_fallback
            && (a < 1.0 || b < 1.0)
        {
            return Err(Error::Config(format!(
                "airmass_fallback values must be >= 1, got [{a}, {b}]"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        CalibrationConfig::default().validate().unwrap();
    }

    #[test]
    fn test_default_grid_matches_band_range() {
        let grid = FitConfig::default().grid();
        assert_eq!(grid.len(), 180);
        assert!((grid[0] + 1.0).abs() < 1e-12);
        assert!((grid[179] - 3.475).abs() < 1e-9);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "cuts:\n  max_instrumental_err: 0.02\nextinction:\n  g: 0.18\n";
        let config = CalibrationConfig::from_yaml_str(yaml).unwrap();

        assert!((config.cuts.max_instrumental_err - 0.02).abs() < 1e-12);
        assert!((config.cuts.max_catalog_err - 0.03).abs() < 1e-12);
        assert!((config.extinction.g - 0.18).abs() < 1e-12);
        assert!((config.extinction.i - 0.058).abs() < 1e-12);
        assert_eq!(config.query, QueryConfig::default());
    }

    #[test]
    fn test_yaml_roundtrip_preserves_fallback() {
        let config = CalibrationConfig {
            airmass_fallback: Some([1.054, 1.075]),
            ..Default::default()
        };
        let yaml = config.to_yaml().unwrap();
        let parsed = CalibrationConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_rejects_inverted_magnitude_limits() {
        let mut config = CalibrationConfig::default();
        config.query.bright_limit = 22.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_bad_confidence() {
        let mut config = CalibrationConfig::default();
        config.fit.confidence = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_annulus_inside_aperture() {
        let mut config = CalibrationConfig::default();
        config.photometry.annulus_factor = 4.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extinction_per_band() {
        let k = ExtinctionCoefficients::default();
        assert!((k.for_band(Band::G) - 0.20).abs() < 1e-12);
        assert!((k.for_band(Band::R) - 0.12).abs() < 1e-12);
        assert!((k.for_band(Band::I) - 0.058).abs() < 1e-12);
    }
}
