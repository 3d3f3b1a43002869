use std::path::PathBuf;

use thiserror::Error;

use crate::calibrate::CalibrationError;
use crate::catalog::CatalogError;
use crate::fit::FitError;
use crate::fits::FitsError;

/// Errors reading or writing the whitespace-separated sidecar tables
/// (`.sdssxy`, `.sdssphot`, `_fwhmCAL.log`, help files).
#[derive(Debug, Error)]
pub enum TableError {
    #[error("Failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}:{line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl TableError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TableError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        TableError::Parse {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}

/// Top-level error for library operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Fit(#[from] FitError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigFormat(#[from] serde_yml::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to render plot '{path}': {reason}")]
    Plot { path: PathBuf, reason: String },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
