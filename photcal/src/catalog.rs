//! SDSS catalog access.
//!
//! Builds the SkyServer SQL cone query, fetches the CSV result over HTTP and
//! parses it into [`SdssStar`] records. The raw CSV is what gets cached next
//! to the image, so parsing works the same on a fresh download and on a
//! cached `.sdss` file.

use std::path::{Path, PathBuf};

use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::config::{QueryConfig, SKYSERVER_URL};

/// SDSS photometric bands in catalog column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum SdssBand {
    U,
    G,
    R,
    I,
    Z,
}

impl SdssBand {
    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// A point source from the SDSS PhotoObjAll table.
#[derive(Debug, Clone, PartialEq)]
pub struct SdssStar {
    /// Right ascension in degrees (J2000)
    pub ra: f64,

    /// Declination in degrees (J2000)
    pub dec: f64,

    /// PSF magnitudes u, g, r, i, z
    pub psf_mag: [f64; 5],

    /// PSF magnitude errors u, g, r, i, z
    pub psf_mag_err: [f64; 5],

    /// 1 when the source is classified as a point source
    pub prob_psf: i32,
}

impl SdssStar {
    #[inline]
    pub fn mag(&self, band: SdssBand) -> f64 {
        self.psf_mag[band.index()]
    }

    #[inline]
    pub fn mag_err(&self, band: SdssBand) -> f64 {
        self.psf_mag_err[band.index()]
    }
}

/// Error type for catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("SkyServer rejected the query: {0}")]
    Sql(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Malformed catalog row {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("No stars found in queried region")]
    NoStarsFound,

    #[error("Failed to access catalog file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Where catalog rows come from.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// SkyServer SQL search over HTTP
    SkyServer {
        /// Endpoint URL of the `x_sql` search tool
        endpoint: String,
    },

    /// CSV text already at hand (cached download, tests, offline use)
    Preloaded {
        /// Raw CSV response text
        csv: String,
    },
}

impl Default for CatalogSource {
    fn default() -> Self {
        Self::skyserver(SKYSERVER_URL)
    }
}

impl CatalogSource {
    pub fn skyserver(endpoint: impl Into<String>) -> Self {
        CatalogSource::SkyServer {
            endpoint: endpoint.into(),
        }
    }

    pub fn preloaded(csv: impl Into<String>) -> Self {
        CatalogSource::Preloaded { csv: csv.into() }
    }

    pub fn from_config(config: &QueryConfig) -> Self {
        Self::skyserver(config.endpoint.clone())
    }

    /// Run `sql` and return the raw CSV response.
    pub fn fetch_csv(&self, sql: &str) -> Result<String, CatalogError> {
        match self {
            CatalogSource::SkyServer { endpoint } => run_skyserver_query(endpoint, sql),
            CatalogSource::Preloaded { csv } => Ok(csv.clone()),
        }
    }

    /// Query all objects within `radius_arcmin` of (ra, dec).
    ///
    /// Returns the raw CSV (for caching) together with the parsed rows.
    pub fn query_field(
        &self,
        ra: f64,
        dec: f64,
        radius_arcmin: f64,
    ) -> Result<(String, Vec<SdssStar>), CatalogError> {
        let sql = nearby_objects_query(ra, dec, radius_arcmin);
        tracing::info!("Querying SDSS around RA={ra:.5} Dec={dec:.5} r={radius_arcmin:.2}'");
        tracing::debug!("SQL:\n{sql}");

        let csv = self.fetch_csv(&sql)?;
        let stars = parse_csv(&csv)?;
        Ok((csv, stars))
    }
}

/// SQL selecting PSF photometry of every object near (ra, dec), nearest first.
pub fn nearby_objects_query(ra: f64, dec: f64, radius_arcmin: f64) -> String {
    format!(
        "select O.ra, O.dec, O.psfMag_u, O.psfMagErr_u, O.psfMag_g, \n\
         O.psfMagErr_g, O.psfMag_r, O.psfMagErr_r, O.psfMag_i, \n\
         O.psfMagErr_i, O.psfMag_z, O.psfMagErr_z, O.probPSF \n\
         from \n\
         dbo.fGetNearbyObjEq({ra},{dec},{radius_arcmin}) \n\
         as N inner join PhotoObjAll as O on O.objID = N.objID order by N.distance"
    )
}

/// Drop `--` comments; every source line ends with a space and a newline.
pub fn strip_sql_comments(sql: &str) -> String {
    sql.lines()
        .map(|line| line.split("--").next().unwrap_or(""))
        .fold(String::with_capacity(sql.len()), |mut out, code| {
            out.push_str(code);
            out.push_str(" \n");
            out
        })
}

fn run_skyserver_query(endpoint: &str, sql: &str) -> Result<String, CatalogError> {
    let cmd = strip_sql_comments(sql);

    let response = ureq::get(endpoint)
        .query("cmd", &cmd)
        .query("format", "csv")
        .call()
        .map_err(|e: ureq::Error| CatalogError::Network(e.to_string()))?;

    if response.status() != 200 {
        return Err(CatalogError::InvalidResponse(format!(
            "HTTP status {}",
            response.status()
        )));
    }

    let body = response
        .into_body()
        .read_to_string()
        .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;

    if body.trim_start().starts_with("ERROR") {
        return Err(CatalogError::Sql(body.trim().to_string()));
    }

    Ok(body
        .lines()
        .map(str::trim_end)
        .fold(String::with_capacity(body.len()), |mut out, line| {
            out.push_str(line);
            out.push('\n');
            out
        }))
}

const CSV_COLUMNS: usize = 13;

/// Parse a SkyServer CSV response.
///
/// The first two lines (table marker and column names) are skipped; each
/// following row holds ra, dec, five (psfMag, psfMagErr) pairs and probPSF.
pub fn parse_csv(text: &str) -> Result<Vec<SdssStar>, CatalogError> {
    if text.trim_start().starts_with("ERROR") {
        return Err(CatalogError::Sql(text.trim().to_string()));
    }

    let mut stars = Vec::new();
    for (idx, line) in text.lines().enumerate().skip(2) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        stars.push(parse_row(line, idx + 1)?);
    }

    if stars.is_empty() {
        return Err(CatalogError::NoStarsFound);
    }
    Ok(stars)
}

fn parse_row(line: &str, line_no: usize) -> Result<SdssStar, CatalogError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < CSV_COLUMNS {
        return Err(CatalogError::Parse {
            line: line_no,
            reason: format!("expected {} columns, found {}", CSV_COLUMNS, fields.len()),
        });
    }

    let value = |i: usize| -> Result<f64, CatalogError> {
        fields[i].parse::<f64>().map_err(|e| CatalogError::Parse {
            line: line_no,
            reason: format!("column {}: '{}': {}", i + 1, fields[i], e),
        })
    };

    let mut psf_mag = [0.0; 5];
    let mut psf_mag_err = [0.0; 5];
    for band in 0..5 {
        psf_mag[band] = value(2 + 2 * band)?;
        psf_mag_err[band] = value(3 + 2 * band)?;
    }

    // probPSF is an integer flag but some exports write it as 1.0
    let prob_psf = value(12)? as i32;

    Ok(SdssStar {
        ra: value(0)?,
        dec: value(1)?,
        psf_mag,
        psf_mag_err,
        prob_psf,
    })
}

pub fn read_csv_file(path: &Path) -> Result<Vec<SdssStar>, CatalogError> {
    let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_csv(&text)
}

pub fn write_csv_file(path: &Path, csv: &str) -> Result<(), CatalogError> {
    std::fs::write(path, csv).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Reference star selection: point sources in a g magnitude window with small errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StarSelection {
    pub faint_limit: f64,
    pub bright_limit: f64,
    pub max_g_err: f64,
}

impl Default for StarSelection {
    fn default() -> Self {
        Self::from_config(&QueryConfig::default())
    }
}

impl StarSelection {
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            faint_limit: config.faint_limit,
            bright_limit: config.bright_limit,
            max_g_err: config.max_g_err,
        }
    }

    pub fn accepts(&self, star: &SdssStar) -> bool {
        let g = star.mag(SdssBand::G);
        star.prob_psf == 1
            && g < self.faint_limit
            && g > self.bright_limit
            && star.mag_err(SdssBand::G) < self.max_g_err
    }

    pub fn select(&self, stars: &[SdssStar]) -> Vec<SdssStar> {
        let kept: Vec<SdssStar> = stars.iter().filter(|s| self.accepts(s)).cloned().collect();
        tracing::info!("Keeping {} stars of {} sources", kept.len(), stars.len());
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const RESPONSE: &str = "#Table1\n\
ra,dec,psfMag_u,psfMagErr_u,psfMag_g,psfMagErr_g,psfMag_r,psfMagErr_r,psfMag_i,psfMagErr_i,psfMag_z,psfMagErr_z,probPSF\n\
250.4201,36.4602,19.1,0.03,17.5,0.01,17.0,0.01,16.8,0.01,16.7,0.02,1\n\
250.4302,36.4501,22.9,0.4,21.7,0.08,21.0,0.06,20.6,0.05,20.4,0.1,1\n\
250.4103,36.4703,18.0,0.02,16.9,0.01,16.2,0.01,15.9,0.01,15.8,0.01,0\n";

    #[test]
    fn test_parse_skyserver_csv() {
        let stars = parse_csv(RESPONSE).unwrap();
        assert_eq!(stars.len(), 3);

        let first = &stars[0];
        assert!((first.ra - 250.4201).abs() < 1e-12);
        assert!((first.dec - 36.4602).abs() < 1e-12);
        assert!((first.mag(SdssBand::G) - 17.5).abs() < 1e-12);
        assert!((first.mag_err(SdssBand::R) - 0.01).abs() < 1e-12);
        assert!((first.mag(SdssBand::Z) - 16.7).abs() < 1e-12);
        assert_eq!(first.prob_psf, 1);
        assert_eq!(stars[2].prob_psf, 0);
    }

    #[test]
    fn test_parse_error_response() {
        let err = parse_csv("ERROR: Incorrect syntax near 'form'\n").unwrap_err();
        assert!(matches!(err, CatalogError::Sql(_)));
    }

    #[test]
    fn test_parse_short_row() {
        let text = "#Table1\nheader\n1.0,2.0,3.0\n";
        let err = parse_csv(text).unwrap_err();
        assert!(matches!(err, CatalogError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_parse_empty_result() {
        let err = parse_csv("#Table1\nra,dec\n").unwrap_err();
        assert!(matches!(err, CatalogError::NoStarsFound));
    }

    #[test]
    fn test_selection_keeps_faint_point_sources_only() {
        let stars = parse_csv(RESPONSE).unwrap();
        let kept = StarSelection::default().select(&stars);

        // second row too faint (g=21.7), third row not a point source
        assert_eq!(kept.len(), 1);
        assert!((kept[0].ra - 250.4201).abs() < 1e-12);
    }

    #[test]
    fn test_selection_rejects_large_g_error() {
        let mut star = parse_csv(RESPONSE).unwrap().remove(0);
        star.psf_mag_err[1] = 0.1;
        assert!(!StarSelection::default().accepts(&star));
    }

    #[test]
    fn test_query_text() {
        let sql = nearby_objects_query(250.42, 36.46, 14.2567);
        assert!(sql.starts_with("select O.ra, O.dec, O.psfMag_u"));
        assert!(sql.contains("dbo.fGetNearbyObjEq(250.42,36.46,14.2567)"));
        assert!(sql.ends_with("order by N.distance"));
    }

    #[test]
    fn test_strip_sql_comments() {
        let sql = "select ra -- right ascension\nfrom PhotoObj -- table\n";
        assert_eq!(strip_sql_comments(sql), "select ra  \nfrom PhotoObj  \n");
    }

    #[test]
    fn test_preloaded_source() {
        let source = CatalogSource::preloaded(RESPONSE);
        let (raw, stars) = source.query_field(250.42, 36.46, 10.0).unwrap();
        assert_eq!(raw, RESPONSE);
        assert_eq!(stars.len(), 3);
    }

    #[test]
    fn test_band_names() {
        assert_eq!(SdssBand::I.to_string(), "i");
        assert_eq!(SdssBand::from_str("r").unwrap(), SdssBand::R);
    }

    #[test]
    fn test_csv_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field_g.sdss");
        write_csv_file(&path, RESPONSE).unwrap();
        assert_eq!(read_csv_file(&path).unwrap().len(), 3);
    }
}
