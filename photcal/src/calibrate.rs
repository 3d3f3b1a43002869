//! Photometric transformation to the SDSS system.
//!
//! Two methods are available. Both start from the matched stars of a field,
//! correct the instrumental magnitudes for atmospheric extinction
//! (`m0 = m - k X`) and apply quality cuts before fitting straight lines.
//!
//! The colour-term method fits
//!
//! ```text
//! g - x  = mu_gx  (g0 - x0) + ZP_gx
//! x - x0 = eps_gx (g - x)   + ZP_x
//! ```
//!
//! each with one sigma-clip pass. The zero-point method fits each band
//! against the catalog colour without clipping,
//!
//! ```text
//! g - g0 = eps_g (g - x) + ZP_g
//! x - x0 = eps_x (g - x) + ZP_x
//! ```
//!
//! and maps the per-star zero points over the detector.

use glam::DVec2;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::catalog::SdssBand;
use crate::config::CalibrationConfig;
use crate::crossmatch::MatchedStar;
use crate::fit::{ConfidenceBand, FitError, LinearFit, MIN_POINTS, SigmaClippedFit};
use crate::stats::{self, BinnedStatistic2d, Statistic};

/// Filter bands the calibration supports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Band {
    G,
    R,
    I,
}

impl Band {
    /// Band from a FILTER keyword value such as `odi_i`, by its last character.
    pub fn from_filter(filter: &str) -> Option<Band> {
        match filter.trim().chars().last()?.to_ascii_lowercase() {
            'g' => Some(Band::G),
            'r' => Some(Band::R),
            'i' => Some(Band::I),
            _ => None,
        }
    }

    pub fn sdss(self) -> SdssBand {
        match self {
            Band::G => SdssBand::G,
            Band::R => SdssBand::R,
            Band::I => SdssBand::I,
        }
    }

    /// Upper-case letter used in header keyword names.
    pub fn keyword(self) -> &'static str {
        match self {
            Band::G => "G",
            Band::R => "R",
            Band::I => "I",
        }
    }
}

/// A fitted coefficient and its standard error.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Solution {
    pub value: f64,
    pub error: f64,
}

impl Solution {
    pub fn slope(fit: &LinearFit) -> Self {
        Self {
            value: fit.slope,
            error: fit.slope_err,
        }
    }

    pub fn intercept(fit: &LinearFit) -> Self {
        Self {
            value: fit.intercept,
            error: fit.intercept_err,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, clap::ValueEnum,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum CalibrationMethod {
    /// Colour term plus zero point of the second band, with sigma clipping
    ColorTerm,
    /// Independent zero point and colour term per band, with a detector map
    ZeroPoint,
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("No stars were measured in both frames")]
    NoMatches,

    #[error("Frame {image} has no airmass and no airmass_fallback is configured")]
    MissingAirmass { image: String },

    #[error("Cannot determine a g/r/i band from filter '{filter}'")]
    UnknownFilter { filter: String },

    #[error("The second frame must be r or i band, got {0}")]
    UnsupportedBand(Band),

    #[error("Only {found} stars survive the {stage}, need at least {needed}")]
    TooFewStars {
        stage: &'static str,
        found: usize,
        needed: usize,
    },

    #[error("Fit of {stage} failed: {source}")]
    Fit {
        stage: &'static str,
        source: FitError,
    },

    #[error("Calibration summary has no {0} coefficient for its method")]
    MissingCoefficient(&'static str),

    #[error("Degenerate transformation: {0}")]
    Degenerate(&'static str),
}

fn fit_context(stage: &'static str) -> impl Fn(FitError) -> CalibrationError {
    move |source| CalibrationError::Fit { stage, source }
}

// =============================================================================
// Instrumental data
// =============================================================================

/// Matched stars with extinction-corrected instrumental magnitudes and the
/// catalog magnitudes of the same bands, as parallel vectors.
#[derive(Debug, Clone)]
pub struct InstrumentalSet {
    /// Band of the second frame
    pub band: Band,
    pub k_g: f64,
    pub k_x: f64,
    pub airmass_g: f64,
    pub airmass_x: f64,
    /// Aperture radius in pixels used in each frame
    pub rapert_g: f64,
    pub rapert_x: f64,
    pub stars: Vec<MatchedStar>,
    /// g0, x0
    pub g0: Vec<f64>,
    pub x0: Vec<f64>,
    /// Catalog magnitudes and errors
    pub g: Vec<f64>,
    pub g_err: Vec<f64>,
    pub x: Vec<f64>,
    pub x_err: Vec<f64>,
}

impl InstrumentalSet {
    pub fn new(stars: Vec<MatchedStar>, config: &CalibrationConfig) -> Result<Self, CalibrationError> {
        let first = stars.first().ok_or(CalibrationError::NoMatches)?;

        let band = Band::from_filter(&first.x.ifilter).ok_or_else(|| {
            CalibrationError::UnknownFilter {
                filter: first.x.ifilter.clone(),
            }
        })?;
        if band == Band::G {
            return Err(CalibrationError::UnsupportedBand(band));
        }
        tracing::info!("Second frame is {band}-band");

        let (airmass_g, airmass_x) = match (first.g.xairmass, first.x.xairmass, config.airmass_fallback) {
            (Some(a), Some(b), _) => (a, b),
            (_, _, Some([a, b])) => {
                tracing::warn!("Using fallback airmass {a:.3} / {b:.3}");
                (a, b)
            }
            (None, _, None) => {
                return Err(CalibrationError::MissingAirmass {
                    image: first.g.image.clone(),
                });
            }
            (Some(_), None, None) => {
                return Err(CalibrationError::MissingAirmass {
                    image: first.x.image.clone(),
                });
            }
        };

        let k_g = config.extinction.for_band(Band::G);
        let k_x = config.extinction.for_band(band);
        let sdss_x = band.sdss();

        Ok(Self {
            band,
            k_g,
            k_x,
            airmass_g,
            airmass_x,
            rapert_g: first.g.rapert,
            rapert_x: first.x.rapert,
            g0: stars.iter().map(|s| s.g.mag - k_g * airmass_g).collect(),
            x0: stars.iter().map(|s| s.x.mag - k_x * airmass_x).collect(),
            g: stars.iter().map(|s| s.catalog_mag(SdssBand::G)).collect(),
            g_err: stars.iter().map(|s| s.catalog_err(SdssBand::G)).collect(),
            x: stars.iter().map(|s| s.catalog_mag(sdss_x)).collect(),
            x_err: stars.iter().map(|s| s.catalog_err(sdss_x)).collect(),
            stars,
        })
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    /// Position of star `j` in the g frame.
    pub fn position(&self, j: usize) -> DVec2 {
        DVec2::new(self.stars[j].g.xcen, self.stars[j].g.ycen)
    }

    pub fn positions(&self) -> Vec<DVec2> {
        (0..self.len()).map(|j| self.position(j)).collect()
    }

    fn passes_error_cuts(&self, j: usize, config: &CalibrationConfig) -> bool {
        let c = &config.cuts;
        let s = &self.stars[j];
        s.g.merr < c.max_instrumental_err
            && s.x.merr < c.max_instrumental_err
            && self.g_err[j] < c.max_catalog_err
            && self.x_err[j] < c.max_catalog_err
    }

    fn passes_peak_window(&self, j: usize, config: &CalibrationConfig) -> bool {
        let c = &config.cuts;
        let inside = |peak: Option<f64>| peak.is_some_and(|p| c.peak_min < p && p < c.peak_max);
        inside(self.stars[j].peak_g) && inside(self.stars[j].peak_x)
    }

    /// Calibrated colour and second-band magnitude of every star from colour-term coefficients.
    pub fn calibrated_cmd(&self, mu: f64, zp_gx: f64, eps: f64, zp_x: f64) -> Vec<(f64, f64)> {
        self.g0
            .iter()
            .zip(&self.x0)
            .map(|(g0, x0)| {
                let gmx = mu * (g0 - x0) + zp_gx;
                (gmx, x0 + eps * gmx + zp_x)
            })
            .collect()
    }
}

fn pick(values: &[f64], idx: &[usize]) -> Vec<f64> {
    idx.iter().map(|&j| values[j]).collect()
}

fn require(stage: &'static str, found: usize) -> Result<(), CalibrationError> {
    if found < MIN_POINTS {
        return Err(CalibrationError::TooFewStars {
            stage,
            found,
            needed: MIN_POINTS,
        });
    }
    Ok(())
}

// =============================================================================
// Colour-term method
// =============================================================================

#[derive(Debug, Clone)]
pub struct ColorTermCalibration {
    pub band: Band,
    /// Indices into the instrumental set of stars that passed the cuts
    pub selected: Vec<usize>,
    /// `g - x` against `g0 - x0`
    pub color_fit: SigmaClippedFit,
    pub color_band: ConfidenceBand,
    /// `x - x0` against `g - x`
    pub magnitude_fit: SigmaClippedFit,
    pub magnitude_band: ConfidenceBand,
    /// Instrumental colour `g0 - x0` of the selected stars
    pub instrumental_color: Vec<f64>,
    /// Catalog colour `g - x` of the selected stars
    pub catalog_color: Vec<f64>,
    /// `x - x0` of the selected stars
    pub delta_x: Vec<f64>,
    /// Calibrated (g - x, x) of every matched star
    pub cmd: Vec<(f64, f64)>,
}

impl ColorTermCalibration {
    pub fn run(set: &InstrumentalSet, config: &CalibrationConfig) -> Result<Self, CalibrationError> {
        let selected: Vec<usize> = (0..set.len())
            .filter(|&j| set.passes_error_cuts(j, config) && set.passes_peak_window(j, config))
            .collect();
        tracing::info!(
            "{} of {} stars pass the error cuts and peak window",
            selected.len(),
            set.len()
        );
        require("error cuts", selected.len())?;

        let g0 = pick(&set.g0, &selected);
        let x0 = pick(&set.x0, &selected);
        let g = pick(&set.g, &selected);
        let x = pick(&set.x, &selected);

        let instrumental_color: Vec<f64> = g0.iter().zip(&x0).map(|(a, b)| a - b).collect();
        let catalog_color: Vec<f64> = g.iter().zip(&x).map(|(a, b)| a - b).collect();
        let delta_x: Vec<f64> = x.iter().zip(&x0).map(|(a, b)| a - b).collect();

        let grid = config.fit.grid();

        let color_fit = SigmaClippedFit::fit(&instrumental_color, &catalog_color)
            .map_err(fit_context("colour term"))?;
        let color_band = ConfidenceBand::compute(&color_fit.fit, &grid, config.fit.confidence)
            .map_err(fit_context("colour term band"))?;

        let magnitude_fit = SigmaClippedFit::fit(&catalog_color, &delta_x)
            .map_err(fit_context("zero point"))?;
        let magnitude_band =
            ConfidenceBand::compute(&magnitude_fit.fit, &grid, config.fit.confidence)
                .map_err(fit_context("zero point band"))?;

        let mu = color_fit.fit.slope;
        let zp_gx = color_fit.fit.intercept;
        let eps = magnitude_fit.fit.slope;
        let zp_x = magnitude_fit.fit.intercept;
        let cmd = set.calibrated_cmd(mu, zp_gx, eps, zp_x);

        let band = set.band;
        tracing::info!(
            "mu_g{band} = {:.7} +- {:.7}, ZP_g{band} = {:.7} +- {:.7}",
            mu,
            color_fit.fit.slope_err,
            zp_gx,
            color_fit.fit.intercept_err
        );
        tracing::info!(
            "eps_g{band} = {:.7} +- {:.7}, ZP_{band} = {:.7} +- {:.7}",
            eps,
            magnitude_fit.fit.slope_err,
            zp_x,
            magnitude_fit.fit.intercept_err
        );

        Ok(Self {
            band,
            selected,
            color_fit,
            color_band,
            magnitude_fit,
            magnitude_band,
            instrumental_color,
            catalog_color,
            delta_x,
            cmd,
        })
    }

    pub fn mu(&self) -> Solution {
        Solution::slope(&self.color_fit.fit)
    }

    pub fn zp_color(&self) -> Solution {
        Solution::intercept(&self.color_fit.fit)
    }

    pub fn eps(&self) -> Solution {
        Solution::slope(&self.magnitude_fit.fit)
    }

    pub fn zp(&self) -> Solution {
        Solution::intercept(&self.magnitude_fit.fit)
    }

    /// Stars remaining after the clip of the `x - x0` fit.
    pub fn n_clipped(&self) -> usize {
        self.magnitude_fit.n_kept()
    }
}

// =============================================================================
// Zero-point method
// =============================================================================

/// Per-region statistics of per-star zero points on an n×n grid of the detector.
#[derive(Debug, Clone)]
pub struct ZeroPointMap {
    pub mean: BinnedStatistic2d,
    pub median: BinnedStatistic2d,
    pub count: BinnedStatistic2d,
    pub std: BinnedStatistic2d,
    /// Median over all stars
    pub global_median: f64,
}

impl ZeroPointMap {
    pub fn compute(positions: &[DVec2], zero_points: &[f64], bins: usize) -> Self {
        let x: Vec<f64> = positions.iter().map(|p| p.x).collect();
        let y: Vec<f64> = positions.iter().map(|p| p.y).collect();
        let binned = |s| stats::binned_statistic_2d(&x, &y, zero_points, s, bins);
        Self {
            mean: binned(Statistic::Mean),
            median: binned(Statistic::Median),
            count: binned(Statistic::Count),
            std: binned(Statistic::Std),
            global_median: stats::median(zero_points),
        }
    }

    pub fn bins(&self) -> usize {
        self.count.values.len()
    }
}

/// Fit of one band in the zero-point method.
#[derive(Debug, Clone)]
pub struct BandZeroPoint {
    pub fit: LinearFit,
    pub band: ConfidenceBand,
    /// `m - m0` of the selected stars
    pub delta: Vec<f64>,
    /// `m - m0 - eps (g - x)` of the selected stars
    pub star_zp: Vec<f64>,
    pub map: ZeroPointMap,
}

impl BandZeroPoint {
    fn fit(
        stage: &'static str,
        color: &[f64],
        delta: Vec<f64>,
        positions: &[DVec2],
        config: &CalibrationConfig,
    ) -> Result<Self, CalibrationError> {
        let fit = LinearFit::fit(color, &delta).map_err(fit_context(stage))?;
        let band = ConfidenceBand::compute(&fit, &config.fit.grid(), config.fit.confidence)
            .map_err(fit_context(stage))?;
        let star_zp: Vec<f64> = delta
            .iter()
            .zip(color)
            .map(|(d, c)| d - fit.slope * c)
            .collect();
        let map = ZeroPointMap::compute(positions, &star_zp, config.fit.zp_map_bins);
        Ok(Self {
            fit,
            band,
            delta,
            star_zp,
            map,
        })
    }

    pub fn eps(&self) -> Solution {
        Solution::slope(&self.fit)
    }

    pub fn zp(&self) -> Solution {
        Solution::intercept(&self.fit)
    }

    /// Scatter of the per-star zero points.
    pub fn star_zp_std(&self) -> f64 {
        stats::std_dev(&self.star_zp)
    }
}

#[derive(Debug, Clone)]
pub struct ZeroPointCalibration {
    pub band: Band,
    pub selected: Vec<usize>,
    /// Catalog colour `g - x` of the selected stars
    pub catalog_color: Vec<f64>,
    /// g-frame positions of the selected stars
    pub positions: Vec<DVec2>,
    pub g: BandZeroPoint,
    pub x: BandZeroPoint,
}

impl ZeroPointCalibration {
    pub fn run(set: &InstrumentalSet, config: &CalibrationConfig) -> Result<Self, CalibrationError> {
        let dg: Vec<f64> = set.g.iter().zip(&set.g0).map(|(a, b)| a - b).collect();
        let dx: Vec<f64> = set.x.iter().zip(&set.x0).map(|(a, b)| a - b).collect();
        let sig_g = standardized_offsets(&dg);
        let sig_x = standardized_offsets(&dx);

        let limit = config.cuts.outlier_sigma;
        let selected: Vec<usize> = (0..set.len())
            .filter(|&j| set.passes_error_cuts(j, config) && sig_g[j] < limit && sig_x[j] < limit)
            .collect();
        tracing::info!("Fitting with {} of {} stars", selected.len(), set.len());
        require("error and outlier cuts", selected.len())?;

        let catalog_color: Vec<f64> = selected.iter().map(|&j| set.g[j] - set.x[j]).collect();
        let positions: Vec<DVec2> = selected.iter().map(|&j| set.position(j)).collect();

        let g = BandZeroPoint::fit("g zero point", &catalog_color, pick(&dg, &selected), &positions, config)?;
        let x = BandZeroPoint::fit(
            "second-band zero point",
            &catalog_color,
            pick(&dx, &selected),
            &positions,
            config,
        )?;

        tracing::info!(
            "eps_g = {:.7} +- {:.7}, ZP_g = {:.7} +- {:.7}, per-star std {:.7}",
            g.fit.slope,
            g.fit.slope_err,
            g.fit.intercept,
            g.fit.intercept_err,
            g.star_zp_std()
        );
        tracing::info!(
            "eps_{} = {:.7} +- {:.7}, ZP_{} = {:.7} +- {:.7}, per-star std {:.7}",
            set.band,
            x.fit.slope,
            x.fit.slope_err,
            set.band,
            x.fit.intercept,
            x.fit.intercept_err,
            x.star_zp_std()
        );

        Ok(Self {
            band: set.band,
            selected,
            catalog_color,
            positions,
            g,
            x,
        })
    }

    /// (eps_g, zp_g, eps_x, zp_x)
    pub fn solutions(&self) -> [Solution; 4] {
        [self.g.eps(), self.g.zp(), self.x.eps(), self.x.zp()]
    }
}

/// `|d - median(d)| / std(d)` for each value; zero when the spread is zero.
fn standardized_offsets(values: &[f64]) -> Vec<f64> {
    let med = stats::median(values);
    let sd = stats::std_dev(values);
    values
        .iter()
        .map(|v| if sd > 0.0 { (v - med).abs() / sd } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SdssStar;
    use crate::photometry::PhotRecord;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const KG: f64 = 0.20;
    const KI: f64 = 0.058;
    const XG: f64 = 1.1;
    const XI: f64 = 1.2;

    fn record(id: usize, mag: f64, filter: &str, airmass: Option<f64>) -> PhotRecord {
        PhotRecord {
            id,
            mag,
            merr: 0.01,
            msky: 100.0,
            stdev: 2.0,
            rapert: 15.0,
            xcen: 100.0 + 37.0 * id as f64 % 900.0,
            ycen: 100.0 + 53.0 * id as f64 % 900.0,
            ifilter: filter.to_string(),
            xairmass: airmass,
            image: format!("F_{filter}"),
        }
    }

    /// Stars obeying `g - g0 = eps_g (g-i) + zp_g` and `i - i0 = eps_i (g-i) + zp_i`.
    fn field(n: usize, noise: f64, eps_g: f64, zp_g: f64, eps_i: f64, zp_i: f64) -> Vec<MatchedStar> {
        let mut rng = StdRng::seed_from_u64(11);
        (1..=n)
            .map(|id| {
                let g = 17.0 + 3.0 * rng.random::<f64>();
                let gi = 0.2 + 1.8 * rng.random::<f64>();
                let i = g - gi;
                let g0 = g - eps_g * gi - zp_g + noise * (rng.random::<f64>() - 0.5);
                let i0 = i - eps_i * gi - zp_i + noise * (rng.random::<f64>() - 0.5);
                MatchedStar {
                    id,
                    catalog: SdssStar {
                        ra: 0.0,
                        dec: 0.0,
                        psf_mag: [g + 1.0, g, g - 0.5 * gi, i, i - 0.1],
                        psf_mag_err: [0.05, 0.01, 0.01, 0.01, 0.02],
                        prob_psf: 1,
                    },
                    g: record(id, g0 + KG * XG, "odi_g", Some(XG)),
                    x: record(id, i0 + KI * XI, "odi_i", Some(XI)),
                    peak_g: Some(10_000.0),
                    peak_x: Some(12_000.0),
                }
            })
            .collect()
    }

    #[test]
    fn test_band_from_filter() {
        assert_eq!(Band::from_filter("odi_i"), Some(Band::I));
        assert_eq!(Band::from_filter("odi_r "), Some(Band::R));
        assert_eq!(Band::from_filter("G"), Some(Band::G));
        assert_eq!(Band::from_filter("Halpha"), None);
        assert_eq!(Band::from_filter(""), None);
        assert_eq!(Band::I.keyword(), "I");
    }

    #[test]
    fn test_method_names() {
        assert_eq!(CalibrationMethod::ColorTerm.to_string(), "color-term");
        assert_eq!(
            "zero-point".parse::<CalibrationMethod>().unwrap(),
            CalibrationMethod::ZeroPoint
        );
    }

    #[test]
    fn test_instrumental_set_applies_extinction() {
        let set = InstrumentalSet::new(field(5, 0.0, 0.0, 26.0, 0.0, 25.5), &CalibrationConfig::default())
            .unwrap();
        assert_eq!(set.band, Band::I);
        assert!((set.k_x - KI).abs() < 1e-12);
        let expected = set.stars[0].g.mag - KG * XG;
        assert!((set.g0[0] - expected).abs() < 1e-12);
        assert!((set.x[0] - set.stars[0].catalog.mag(SdssBand::I)).abs() < 1e-12);
    }

    #[test]
    fn test_missing_airmass_without_fallback() {
        let mut stars = field(5, 0.0, 0.0, 26.0, 0.0, 25.5);
        stars[0].g.xairmass = None;
        let err = InstrumentalSet::new(stars.clone(), &CalibrationConfig::default()).unwrap_err();
        assert!(matches!(err, CalibrationError::MissingAirmass { .. }));

        let config = CalibrationConfig {
            airmass_fallback: Some([1.054, 1.075]),
            ..Default::default()
        };
        let set = InstrumentalSet::new(stars, &config).unwrap();
        assert!((set.airmass_g - 1.054).abs() < 1e-12);
        assert!((set.airmass_x - 1.075).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_filter() {
        let mut stars = field(5, 0.0, 0.0, 26.0, 0.0, 25.5);
        stars[0].x.ifilter = "INDEF".to_string();
        assert!(matches!(
            InstrumentalSet::new(stars, &CalibrationConfig::default()),
            Err(CalibrationError::UnknownFilter { .. })
        ));
    }

    #[test]
    fn test_empty_match() {
        assert!(matches!(
            InstrumentalSet::new(Vec::new(), &CalibrationConfig::default()),
            Err(CalibrationError::NoMatches)
        ));
    }

    #[test]
    fn test_zero_point_recovers_coefficients() {
        let config = CalibrationConfig::default();
        let set = InstrumentalSet::new(field(60, 0.0, 0.05, 26.1, -0.03, 25.4), &config).unwrap();
        let zp = ZeroPointCalibration::run(&set, &config).unwrap();

        let [eps_g, zp_g, eps_x, zp_x] = zp.solutions();
        assert!((eps_g.value - 0.05).abs() < 1e-9, "eps_g = {}", eps_g.value);
        assert!((zp_g.value - 26.1).abs() < 1e-9);
        assert!((eps_x.value + 0.03).abs() < 1e-9);
        assert!((zp_x.value - 25.4).abs() < 1e-9);
        assert!(zp.g.star_zp_std() < 1e-9);
        assert_eq!(zp.g.map.bins(), 3);
        let counted: f64 = zp.g.map.count.values.iter().flatten().sum();
        assert!((counted - zp.selected.len() as f64).abs() < 1e-9);
    }

    #[test]
    fn test_zero_point_outlier_cut() {
        let config = CalibrationConfig::default();
        let mut stars = field(60, 0.02, 0.05, 26.1, -0.03, 25.4);
        stars[5].g.mag -= 1.0;
        let set = InstrumentalSet::new(stars, &config).unwrap();
        let zp = ZeroPointCalibration::run(&set, &config).unwrap();

        assert!(!zp.selected.contains(&5));
        assert!((zp.g.zp().value - 26.1).abs() < 0.02);
    }

    #[test]
    fn test_color_term_recovers_coefficients() {
        let config = CalibrationConfig::default();
        let set = InstrumentalSet::new(field(80, 0.004, 0.05, 26.1, -0.03, 25.4), &config).unwrap();
        let ct = ColorTermCalibration::run(&set, &config).unwrap();

        // g - i = (g0 - i0 + zp_g - zp_i) / (1 - eps_g + eps_i)
        let mu = 1.0 / (1.0 - 0.05 - 0.03);
        assert!((ct.mu().value - mu).abs() < 0.02, "mu = {}", ct.mu().value);
        assert!((ct.eps().value + 0.03).abs() < 0.01);
        assert!((ct.zp().value - 25.4).abs() < 0.01);
        assert!(ct.n_clipped() <= ct.selected.len());
        assert_eq!(ct.cmd.len(), set.len());
        assert_eq!(ct.color_band.grid.len(), 180);
    }

    #[test]
    fn test_peak_window_excludes_faint_stars() {
        let config = CalibrationConfig::default();
        let mut stars = field(30, 0.004, 0.0, 26.0, 0.0, 25.5);
        stars[0].peak_g = Some(500.0);
        stars[1].peak_x = Some(46_000.0);
        stars[2].peak_x = None;
        let set = InstrumentalSet::new(stars, &config).unwrap();
        let ct = ColorTermCalibration::run(&set, &config).unwrap();
        assert!(!ct.selected.iter().any(|j| *j < 3));
        assert_eq!(ct.selected.len(), 27);
    }

    #[test]
    fn test_too_few_stars_after_cuts() {
        let config = CalibrationConfig::default();
        let mut stars = field(4, 0.0, 0.0, 26.0, 0.0, 25.5);
        for s in stars.iter_mut().skip(1) {
            s.g.merr = 0.5;
        }
        let set = InstrumentalSet::new(stars, &config).unwrap();
        assert!(matches!(
            ColorTermCalibration::run(&set, &config),
            Err(CalibrationError::TooFewStars { found: 1, .. })
        ));
    }
}
