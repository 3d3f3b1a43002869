//! Straight-line fitting: ordinary least squares, one-pass sigma clipping and
//! Student's-t confidence bands.

use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

use crate::stats;

/// Minimum number of points for a fit with a residual variance estimate.
pub const MIN_POINTS: usize = 3;

#[derive(Debug, Error, PartialEq)]
pub enum FitError {
    #[error("Need at least {needed} points to fit a line, got {got}")]
    TooFewPoints { needed: usize, got: usize },

    #[error("All x values are identical; slope is undefined")]
    Degenerate,

    #[error("Confidence level must be in (0, 1), got {0}")]
    InvalidConfidence(f64),
}

/// Result of an ordinary least squares fit `y = slope * x + intercept`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Standard error of the slope
    pub slope_err: f64,
    /// Standard error of the intercept
    pub intercept_err: f64,
    /// Population standard deviation of the residuals
    pub rms: f64,
    /// Number of points used
    pub n: usize,
    /// Residual variance, SSR / (n - 2)
    pub mse: f64,
    pub x_mean: f64,
    /// Sum of squared deviations of x from its mean
    pub sxx: f64,
}

impl LinearFit {
    pub fn fit(x: &[f64], y: &[f64]) -> Result<Self, FitError> {
        assert_eq!(x.len(), y.len(), "x and y lengths differ");

        let n = x.len();
        if n < MIN_POINTS {
            return Err(FitError::TooFewPoints {
                needed: MIN_POINTS,
                got: n,
            });
        }

        let x_mean = stats::mean(x);
        let y_mean = stats::mean(y);
        let sxx: f64 = x.iter().map(|xi| (xi - x_mean).powi(2)).sum();
        if sxx <= f64::EPSILON * n as f64 {
            return Err(FitError::Degenerate);
        }
        let sxy: f64 = x
            .iter()
            .zip(y)
            .map(|(xi, yi)| (xi - x_mean) * (yi - y_mean))
            .sum();

        let slope = sxy / sxx;
        let intercept = y_mean - slope * x_mean;

        let residuals: Vec<f64> = x
            .iter()
            .zip(y)
            .map(|(xi, yi)| yi - (slope * xi + intercept))
            .collect();
        let ssr: f64 = residuals.iter().map(|r| r * r).sum();
        let mse = ssr / (n - 2) as f64;

        Ok(Self {
            slope,
            intercept,
            slope_err: (mse / sxx).sqrt(),
            intercept_err: (mse * (1.0 / n as f64 + x_mean * x_mean / sxx)).sqrt(),
            rms: stats::std_dev(&residuals),
            n,
            mse,
            x_mean,
            sxx,
        })
    }

    #[inline]
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// Residuals `prediction - y`.
    pub fn residuals(&self, x: &[f64], y: &[f64]) -> Vec<f64> {
        x.iter().zip(y).map(|(xi, yi)| self.predict(*xi) - yi).collect()
    }

    /// Population standard deviation of the residuals on (x, y).
    pub fn residual_std(&self, x: &[f64], y: &[f64]) -> f64 {
        stats::std_dev(&self.residuals(x, y))
    }
}

/// Fit, drop points beyond one residual standard deviation, refit.
pub fn sigma_clip_fit(x: &[f64], y: &[f64]) -> Result<SigmaClippedFit, FitError> {
    SigmaClippedFit::fit(x, y)
}

/// A fit followed by one rejection pass and a refit.
///
/// Points whose residual exceeds one standard deviation of all residuals are
/// dropped before the second fit.
#[derive(Debug, Clone, PartialEq)]
pub struct SigmaClippedFit {
    /// Fit to all points
    pub initial: LinearFit,
    /// Fit to the points that survived clipping
    pub fit: LinearFit,
    /// Per-input flag: true when the point was kept
    pub kept: Vec<bool>,
}

impl SigmaClippedFit {
    pub fn fit(x: &[f64], y: &[f64]) -> Result<Self, FitError> {
        let initial = LinearFit::fit(x, y)?;
        let residuals = initial.residuals(x, y);
        let threshold = initial.residual_std(x, y);

        let kept: Vec<bool> = residuals.iter().map(|r| r.abs() < threshold).collect();
        let (xk, yk): (Vec<f64>, Vec<f64>) = x
            .iter()
            .zip(y)
            .zip(&kept)
            .filter(|(_, keep)| **keep)
            .map(|((xi, yi), _)| (*xi, *yi))
            .unzip();

        tracing::debug!(
            "Sigma clip kept {} of {} points (threshold {:.4})",
            xk.len(),
            x.len(),
            threshold
        );

        let fit = LinearFit::fit(&xk, &yk)?;
        Ok(Self { initial, fit, kept })
    }

    /// Scatter reported for the clipped fit: residual spread of the first pass.
    #[inline]
    pub fn rms(&self) -> f64 {
        self.initial.rms
    }

    pub fn n_kept(&self) -> usize {
        self.kept.iter().filter(|k| **k).count()
    }
}

/// Confidence band of a [`LinearFit`] evaluated on a grid of x values.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceBand {
    pub grid: Vec<f64>,
    pub center: Vec<f64>,
    /// Half-width of the band at each grid point
    pub half_width: Vec<f64>,
    pub confidence: f64,
}

impl ConfidenceBand {
    /// Band of the mean response at confidence level `confidence`.
    ///
    /// `dy = t(1 - a/2, n-2) * sqrt(mse * (1/n + (x - mean)^2 / sxx))`
    pub fn compute(fit: &LinearFit, grid: &[f64], confidence: f64) -> Result<Self, FitError> {
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(FitError::InvalidConfidence(confidence));
        }
        let q = t_quantile(fit.n, confidence)?;

        let n = fit.n as f64;
        let half_width = grid
            .iter()
            .map(|x| q * (fit.mse * (1.0 / n + (x - fit.x_mean).powi(2) / fit.sxx)).sqrt())
            .collect();

        Ok(Self {
            grid: grid.to_vec(),
            center: grid.iter().map(|x| fit.predict(*x)).collect(),
            half_width,
            confidence,
        })
    }

    pub fn lower(&self) -> Vec<f64> {
        self.center
            .iter()
            .zip(&self.half_width)
            .map(|(c, h)| c - h)
            .collect()
    }

    pub fn upper(&self) -> Vec<f64> {
        self.center
            .iter()
            .zip(&self.half_width)
            .map(|(c, h)| c + h)
            .collect()
    }
}

/// Two-sided Student's t quantile for a fit with `n` points.
fn t_quantile(n: usize, confidence: f64) -> Result<f64, FitError> {
    if n < MIN_POINTS {
        return Err(FitError::TooFewPoints {
            needed: MIN_POINTS,
            got: n,
        });
    }
    let alpha = 1.0 - confidence;
    let dist = StudentsT::new(0.0, 1.0, (n - 2) as f64).map_err(|_| FitError::TooFewPoints {
        needed: MIN_POINTS,
        got: n,
    })?;
    Ok(dist.inverse_cdf(1.0 - alpha / 2.0))
}
