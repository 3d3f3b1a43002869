//! Photcal - photometric calibration of two-filter imaging against SDSS.
//!
//! Given a g-band image and an r- or i-band image of the same field this
//! library:
//! - queries the SDSS SkyServer for point sources in the field of view
//! - projects them into both frames through the image WCS
//! - measures stellar profiles and aperture photometry at those positions
//! - fits colour-term and zero-point transformations to the SDSS system,
//!   with sigma clipping and Student's-t confidence bands
//! - writes a coefficient report and diagnostic plots
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use photcal::{CalibrationConfig, CalibrationMethod, Pipeline};
//!
//! let config = CalibrationConfig::default();
//! let pipeline = Pipeline::new("M13_g.fits", "M13_i.fits", config);
//! let outcome = pipeline.run(CalibrationMethod::ZeroPoint)?;
//! println!("ZP_x = {:.4}", outcome.summary.zp_x.value);
//! ```

pub mod calibrate;
pub mod catalog;
pub mod config;
pub mod crossmatch;
mod error;
pub mod fit;
pub mod fits;
pub mod photometry;
pub mod pipeline;
pub mod plot;
pub mod profile;
pub mod report;
pub mod stats;
pub mod wcs;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Errors
// ============================================================================

pub use error::{Error, Result, TableError};

// ============================================================================
// Configuration
// ============================================================================

pub use config::{
    CalibrationConfig, CutConfig, ExtinctionCoefficients, FitConfig, PhotometryConfig,
    ProfileConfig, QueryConfig,
};

// ============================================================================
// Frames and coordinates
// ============================================================================

pub use fits::{FitsError, FrameHeader, FrameImage};
pub use wcs::Wcs;

// ============================================================================
// Catalog and measurement
// ============================================================================

pub use catalog::{CatalogError, CatalogSource, SdssBand, SdssStar, StarSelection};
pub use crossmatch::{MatchedStar, ReferenceList, ReferenceStar};
pub use photometry::{PhotRecord, PhotometryParams};
pub use profile::StarProfile;

// ============================================================================
// Fitting and calibration
// ============================================================================

pub use calibrate::{
    Band, CalibrationError, CalibrationMethod, ColorTermCalibration, Solution,
    ZeroPointCalibration,
};
pub use fit::{ConfidenceBand, FitError, LinearFit, SigmaClippedFit};
pub use report::CalibrationSummary;

// ============================================================================
// Pipeline
// ============================================================================

pub use pipeline::{FieldPaths, Pipeline, PipelineOutcome};
