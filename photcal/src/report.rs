//! Calibration products: the coefficient help files, a JSON summary, FITS
//! header keywords and application of the coefficients to source lists.
//!
//! The help files are fixed-width tables. Each coefficient row carries the
//! name of the FITS keyword it is stored under, and [`read_help_file`] looks
//! values up by that keyword rather than by line position.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibrate::{
    Band, CalibrationError, CalibrationMethod, ColorTermCalibration, InstrumentalSet, Solution,
    ZeroPointCalibration,
};
use crate::config::{CalibrationConfig, ExtinctionCoefficients};
use crate::error::{Error, Result, TableError};
use crate::photometry::PhotRecord;

const RULE: &str = "----------------------------------------------------";
const DOTTED: &str = " - - - - - - - - - - - - - - - - - - - - - - - - - -";

/// Magnitude error of a 5-sigma detection.
const LIMIT_ERR: f64 = 0.2;

/// Everything a calibration run determined, independent of the method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    pub field: String,
    pub method: CalibrationMethod,
    /// Band of the second frame
    pub band: Band,
    pub extinction: ExtinctionCoefficients,
    pub airmass_g: f64,
    pub airmass_x: f64,

    /// Colour-term method: `g - x = mu (g0 - x0) + zp_gx`
    pub mu_gx: Option<Solution>,
    pub zp_gx: Option<Solution>,
    pub rms_gx: Option<f64>,

    /// Zero-point method: `g - g0 = eps_g (g - x) + zp_g`
    pub eps_g: Option<Solution>,
    pub zp_g: Option<Solution>,
    pub rms_g: Option<f64>,

    /// Both methods: `x - x0 = eps_x (g - x) + zp_x`
    pub eps_x: Solution,
    pub zp_x: Solution,
    pub rms_x: f64,

    /// Seeing FWHM in pixels
    pub fwhm_g: f64,
    pub fwhm_x: f64,
    pub pixel_scale_arcsec: f64,
    /// Aperture radius in units of FWHM
    pub aperture_factor: f64,

    pub max_instrumental_err: f64,
    pub max_catalog_err: f64,
    pub n_stars: usize,
    /// Stars left after sigma clipping (colour-term method)
    pub n_clipped: Option<usize>,
}

impl CalibrationSummary {
    fn base(field: &str, method: CalibrationMethod, set: &InstrumentalSet, config: &CalibrationConfig) -> Self {
        let factor = config.photometry.aperture_factor;
        Self {
            field: field.to_string(),
            method,
            band: set.band,
            extinction: config.extinction,
            airmass_g: set.airmass_g,
            airmass_x: set.airmass_x,
            mu_gx: None,
            zp_gx: None,
            rms_gx: None,
            eps_g: None,
            zp_g: None,
            rms_g: None,
            eps_x: Solution::default(),
            zp_x: Solution::default(),
            rms_x: 0.0,
            fwhm_g: set.rapert_g / factor,
            fwhm_x: set.rapert_x / factor,
            pixel_scale_arcsec: config.pixel_scale_arcsec,
            aperture_factor: factor,
            max_instrumental_err: config.cuts.max_instrumental_err,
            max_catalog_err: config.cuts.max_catalog_err,
            n_stars: 0,
            n_clipped: None,
        }
    }

    pub fn from_color_term(
        field: &str,
        set: &InstrumentalSet,
        cal: &ColorTermCalibration,
        config: &CalibrationConfig,
    ) -> Self {
        Self {
            mu_gx: Some(cal.mu()),
            zp_gx: Some(cal.zp_color()),
            rms_gx: Some(cal.color_fit.rms()),
            eps_x: cal.eps(),
            zp_x: cal.zp(),
            rms_x: cal.magnitude_fit.rms(),
            n_stars: cal.selected.len(),
            n_clipped: Some(cal.n_clipped()),
            ..Self::base(field, CalibrationMethod::ColorTerm, set, config)
        }
    }

    pub fn from_zero_point(
        field: &str,
        set: &InstrumentalSet,
        cal: &ZeroPointCalibration,
        config: &CalibrationConfig,
    ) -> Self {
        Self {
            eps_g: Some(cal.g.eps()),
            zp_g: Some(cal.g.zp()),
            rms_g: Some(cal.g.fit.rms),
            eps_x: cal.x.eps(),
            zp_x: cal.x.zp(),
            rms_x: cal.x.fit.rms,
            n_stars: cal.selected.len(),
            ..Self::base(field, CalibrationMethod::ZeroPoint, set, config)
        }
    }

    pub fn k_x(&self) -> f64 {
        self.extinction.for_band(self.band)
    }

    pub fn seeing_arcsec(&self, band: Band) -> f64 {
        let fwhm = if band == Band::G { self.fwhm_g } else { self.fwhm_x };
        fwhm * self.pixel_scale_arcsec
    }

    /// Keyword/value pairs stored in the header of the frame of `image_band`.
    pub fn header_keywords(&self, image_band: Band) -> Vec<(String, f64)> {
        let b = self.band.keyword();
        let mut keys = vec![
            ("F_KG".to_string(), self.extinction.g),
            (format!("F_K{b}"), self.k_x()),
            ("F_XG".to_string(), self.airmass_g),
            (format!("F_X{b}"), self.airmass_x),
        ];
        keys.extend(
            self.coefficient_rows()
                .into_iter()
                .filter(|row| !row.is_separator())
                .map(|row| (row.keyword, row.value)),
        );

        let fwhm = if image_band == Band::G { self.fwhm_g } else { self.fwhm_x };
        keys.push(("F_AVGSEE".to_string(), self.seeing_arcsec(image_band)));
        keys.push(("FWHMPSF".to_string(), fwhm));
        keys
    }

    fn coefficient_rows(&self) -> Vec<HelpRow> {
        let b = self.band.to_string();
        let bu = self.band.keyword();
        let mut rows = Vec::new();

        if let (Some(mu), Some(zp), Some(rms)) = (self.mu_gx, self.zp_gx, self.rms_gx) {
            rows.push(HelpRow::new(format!("g-{b} color term"), format!("mu_g{b}"), format!("F_MU_G{bu}"), mu.value));
            rows.push(HelpRow::new(format!("g-{b} c.t. err"), format!("mue_g{b}"), format!("F_MUE_G{bu}"), mu.error));
            rows.push(HelpRow::new(format!("g-{b} zeropoint"), format!("ZP_g{b}"), format!("F_ZP_G{bu}"), zp.value));
            rows.push(HelpRow::new(format!("g-{b} ZP err"), format!("ZPE_g{b}"), format!("F_ZPE_G{bu}"), zp.error));
            rows.push(HelpRow::new(format!("g-{b} fit RMS"), "rms".to_string(), format!("F_RMS_G{bu}"), rms));
            rows.push(HelpRow::separator());
            rows.push(HelpRow::new(format!("{b} color term"), format!("eps_g{b}"), format!("F_EPS_G{bu}"), self.eps_x.value));
            rows.push(HelpRow::new(format!("{b} c.t. err"), format!("epse_g{b}"), format!("F_EPSE_G{bu}"), self.eps_x.error));
        }

        if let (Some(eps), Some(zp), Some(rms)) = (self.eps_g, self.zp_g, self.rms_g) {
            rows.push(HelpRow::new("g color term".to_string(), "eps_g".to_string(), "F_EPS_G".to_string(), eps.value));
            rows.push(HelpRow::new("g c.t. err".to_string(), "epse_g".to_string(), "F_EPSE_G".to_string(), eps.error));
            rows.push(HelpRow::new("g zeropoint".to_string(), "ZP_g".to_string(), "F_ZP_G".to_string(), zp.value));
            rows.push(HelpRow::new("g ZP err".to_string(), "ZPE_g".to_string(), "F_ZPE_G".to_string(), zp.error));
            rows.push(HelpRow::new("g fit RMS".to_string(), "rms".to_string(), "F_RMS_G".to_string(), rms));
            rows.push(HelpRow::separator());
            rows.push(HelpRow::new(format!("{b} color term"), format!("eps_{b}"), format!("F_EPS_{bu}"), self.eps_x.value));
            rows.push(HelpRow::new(format!("{b} c.t. err"), format!("epse_{b}"), format!("F_EPSE_{bu}"), self.eps_x.error));
        }

        rows.push(HelpRow::new(format!("{b} zeropoint"), format!("ZP_{b}"), format!("F_ZP_{bu}"), self.zp_x.value));
        rows.push(HelpRow::new(format!("{b} ZP err"), format!("ZPe_{b}"), format!("F_ZPE_{bu}"), self.zp_x.error));
        rows.push(HelpRow::new(format!("{b} fit RMS"), "rms".to_string(), format!("F_RMS_{bu}"), self.rms_x));
        rows
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

// =============================================================================
// Help files
// =============================================================================

struct HelpRow {
    name: String,
    symbol: String,
    keyword: String,
    value: f64,
}

impl HelpRow {
    fn new(name: String, symbol: String, keyword: String, value: f64) -> Self {
        Self {
            name,
            symbol,
            keyword,
            value,
        }
    }

    fn separator() -> Self {
        Self::new(String::new(), String::new(), String::new(), f64::NAN)
    }

    fn is_separator(&self) -> bool {
        self.keyword.is_empty()
    }

    fn write(&self, out: &mut String) {
        if self.is_separator() {
            out.push_str(DOTTED);
            out.push('\n');
        } else {
            let _ = writeln!(
                out,
                "  {:<16}{:<9}{:<11}{:.7}",
                self.name, self.symbol, self.keyword, self.value
            );
        }
    }
}

fn write_help_table(out: &mut String, summary: &CalibrationSummary) {
    let b = summary.band.to_string();
    let bu = summary.band.keyword();
    let k = &summary.extinction;

    out.push_str(RULE);
    out.push('\n');
    let header_rows = [
        HelpRow::new("extn coeff".into(), "k_g".into(), "F_KG".into(), k.g),
        HelpRow::new("extn coeff".into(), format!("k_{b}"), format!("F_K{bu}"), summary.k_x()),
        HelpRow::new("airmass in g".into(), "X_g".into(), "F_XG".into(), summary.airmass_g),
        HelpRow::new(format!("airmass in {b}"), format!("X_{b}"), format!("F_X{bu}"), summary.airmass_x),
        HelpRow::separator(),
    ];
    for row in header_rows.iter().chain(summary.coefficient_rows().iter()) {
        row.write(out);
    }
    out.push_str(RULE);
    out.push('\n');

    let factor = summary.aperture_factor;
    let scale = summary.pixel_scale_arcsec;
    out.push_str("other details:\n");
    let _ = writeln!(out, "  FWHM PSF [px] g fwhm     FWHMPSF   {:.5}", summary.fwhm_g);
    let _ = writeln!(out, "  FWHM PSF [px] {b} fwhm     FWHMPSF   {:.5}", summary.fwhm_x);
    let _ = writeln!(out, "  FWHM [arcsec] g fwhm     F_AVGSEE  {:.5}", summary.fwhm_g * scale);
    let _ = writeln!(out, "  FWHM [arcsec] {b} fwhm     F_AVGSEE  {:.5}", summary.fwhm_x * scale);
    let _ = writeln!(out, "  phot aperture ({factor}xFWHM) g [arcsec]  {:.5}", factor * summary.fwhm_g * scale);
    let _ = writeln!(out, "  phot aperture ({factor}xFWHM) {b} [arcsec]  {:.5}", factor * summary.fwhm_x * scale);
    let _ = writeln!(out, "  pixel scale [arcsec/px]            {scale:.5}");
    out.push_str(RULE);
    out.push('\n');

    out.push_str("photometric error cuts:\n");
    let _ = writeln!(out, "  maximum acceptable instrumental error: {:.4}", summary.max_instrumental_err);
    let _ = writeln!(out, "  maximum acceptable sdss phot error: {:.4}", summary.max_catalog_err);
    let _ = writeln!(out, "  N_stars surviving error cuts: {:4}", summary.n_stars);
    if let Some(n) = summary.n_clipped {
        let _ = writeln!(out, "  N_stars surviving sigma clip ({b}-{b}0 vs g-{b} plot): {n:4}");
    }
}

/// Render the help file of `summary` in the layout of its method.
pub fn format_help(summary: &CalibrationSummary) -> String {
    let b = summary.band.to_string();
    let mut out = String::with_capacity(4096);

    match summary.method {
        CalibrationMethod::ColorTerm => {
            let factor = summary.aperture_factor;
            let _ = write!(
                out,
                "this has some information about the calibration. don't panic.\n\
                 it is run on matched pairs of images (g + {b})\n\
                 \n\
                 it follows the standard method of photometric calibrations:\n\
                 \n\
                 g-{b} = mu_g{b} ( g0 - {b}0 ) + ZP_g{b}\n\
                 {b} = {b}0 + eps_g{b} ( g - {b} ) + ZP_{b}\n\
                 \n\
                 \x20  where g0 = g_i - k_g * X_g  include airmass extinction\n\
                 \x20        {b}0 = {b}_i - k_{b} * X_{b}\n\
                 Fits generate errors on mu/eps/ZP and also rms for both\n\
                 \n\
                 g_i/{b}_i are instrumental magnitudes, measured in apertures {factor}x FWHM\n\
                 \n\
                 all of these coefficients can be saved to both image headers,\n\
                 \x20   and are reproduced below.\n\
                 \n\
                 in particular, this is the calibration for {}\n\
                 \n\
                 \x20 name          symbol     IMHEAD     value\n",
                summary.field
            );
        }
        CalibrationMethod::ZeroPoint => {
            out.push_str("#  name           symbol   IMHEAD    value\n");
        }
    }

    write_help_table(&mut out, summary);
    out
}

pub fn write_help_file(path: &Path, summary: &CalibrationSummary) -> Result<()> {
    std::fs::write(path, format_help(summary)).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!("Wrote calibration coefficients to {}", path.display());
    Ok(())
}

/// Parse a help file back into a summary.
///
/// The field name is taken from the file name (text before the first `_`).
pub fn read_help_file(path: &Path) -> std::result::Result<CalibrationSummary, TableError> {
    let text = std::fs::read_to_string(path).map_err(|e| TableError::io(path, e))?;
    let field = common::field_root(path);
    parse_help(&text, &field).map_err(|reason| TableError::parse(path, 0, reason))
}

fn parse_help(text: &str, field: &str) -> std::result::Result<CalibrationSummary, String> {
    // (keyword, value) in file order; keywords repeat for per-image values
    let mut keyed: Vec<(&str, f64)> = Vec::new();
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        for pair in tokens.windows(2) {
            let key = pair[0];
            if (key.starts_with("F_") || key == "FWHMPSF")
                && let Ok(value) = pair[1].parse::<f64>()
            {
                keyed.push((key, value));
            }
        }
    }

    let nth = |key: &str, n: usize| keyed.iter().filter(|(k, _)| *k == key).nth(n).map(|(_, v)| *v);
    let get = |key: &str| nth(key, 0).ok_or_else(|| format!("missing keyword {key}"));
    let solution = |value: &str, error: &str| -> std::result::Result<Solution, String> {
        Ok(Solution {
            value: get(value)?,
            error: get(error)?,
        })
    };
    let labelled = |label: &str| {
        text.lines()
            .find(|l| l.contains(label))
            .and_then(|l| l.split_whitespace().last())
            .and_then(|v| v.parse::<f64>().ok())
    };

    let band = keyed
        .iter()
        .find_map(|(k, _)| match k.strip_prefix("F_X")? {
            "R" => Some(Band::R),
            "I" => Some(Band::I),
            _ => None,
        })
        .ok_or("cannot determine the second band (no F_XR / F_XI)")?;
    let bu = band.keyword();

    let defaults = ExtinctionCoefficients::default();
    let extinction = ExtinctionCoefficients {
        g: nth("F_KG", 0).unwrap_or(defaults.g),
        r: nth("F_KR", 0).unwrap_or(defaults.r),
        i: nth("F_KI", 0).unwrap_or(defaults.i),
    };

    let method = if nth(&format!("F_MU_G{bu}"), 0).is_some() {
        CalibrationMethod::ColorTerm
    } else {
        CalibrationMethod::ZeroPoint
    };

    let fwhm_g = get("FWHMPSF")?;
    let fwhm_x = nth("FWHMPSF", 1).unwrap_or(fwhm_g);
    let pixel_scale_arcsec = labelled("pixel scale")
        .or_else(|| nth("F_AVGSEE", 0).map(|s| s / fwhm_g))
        .ok_or("missing pixel scale")?;
    let aperture_factor = labelled("phot aperture")
        .map(|arcsec| arcsec / (fwhm_g * pixel_scale_arcsec))
        .unwrap_or(5.0);

    let mut summary = CalibrationSummary {
        field: field.to_string(),
        method,
        band,
        extinction,
        airmass_g: get("F_XG")?,
        airmass_x: get(&format!("F_X{bu}"))?,
        mu_gx: None,
        zp_gx: None,
        rms_gx: None,
        eps_g: None,
        zp_g: None,
        rms_g: None,
        eps_x: Solution::default(),
        zp_x: solution(&format!("F_ZP_{bu}"), &format!("F_ZPE_{bu}"))?,
        rms_x: get(&format!("F_RMS_{bu}"))?,
        fwhm_g,
        fwhm_x,
        pixel_scale_arcsec,
        aperture_factor,
        max_instrumental_err: labelled("maximum acceptable instrumental error").unwrap_or(0.0),
        max_catalog_err: labelled("maximum acceptable sdss phot error").unwrap_or(0.0),
        n_stars: labelled("N_stars surviving error cuts").map_or(0, |n| n as usize),
        n_clipped: labelled("N_stars surviving sigma clip").map(|n| n as usize),
    };

    match method {
        CalibrationMethod::ColorTerm => {
            summary.mu_gx = Some(solution(&format!("F_MU_G{bu}"), &format!("F_MUE_G{bu}"))?);
            summary.zp_gx = Some(solution(&format!("F_ZP_G{bu}"), &format!("F_ZPE_G{bu}"))?);
            summary.rms_gx = Some(get(&format!("F_RMS_G{bu}"))?);
            summary.eps_x = solution(&format!("F_EPS_G{bu}"), &format!("F_EPSE_G{bu}"))?;
        }
        CalibrationMethod::ZeroPoint => {
            summary.eps_g = Some(solution("F_EPS_G", "F_EPSE_G")?);
            summary.zp_g = Some(solution("F_ZP_G", "F_ZPE_G")?);
            summary.rms_g = Some(get("F_RMS_G")?);
            summary.eps_x = solution(&format!("F_EPS_{bu}"), &format!("F_EPSE_{bu}"))?;
        }
    }
    Ok(summary)
}

// =============================================================================
// Applying a calibration
// =============================================================================

/// Per-band corrections added when applying a calibration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ApplyOptions {
    /// Aperture corrections (g, x) added to the instrumental magnitudes
    pub aperture_correction: [f64; 2],
    /// Galactic extinction (A_g, A_x) subtracted from the calibrated magnitudes
    pub galactic_extinction: [f64; 2],
}

/// A source measured in both frames with calibrated magnitudes.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedSource {
    pub id: usize,
    pub g_pos: (f64, f64),
    pub g: f64,
    pub g_err: f64,
    pub x_pos: (f64, f64),
    pub x: f64,
    pub x_err: f64,
    /// g - x
    pub color: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedCalibration {
    pub sources: Vec<CalibratedSource>,
    /// Brightest g magnitude with an error of at least 0.2 mag
    pub limit_g: Option<f64>,
    pub limit_x: Option<f64>,
}

/// Calibrate matched instrumental photometry of arbitrary sources.
///
/// Sources are joined on id. Errors are the instrumental errors.
pub fn apply_calibration(
    summary: &CalibrationSummary,
    g_records: &[PhotRecord],
    x_records: &[PhotRecord],
    options: &ApplyOptions,
) -> std::result::Result<AppliedCalibration, CalibrationError> {
    let k_g = summary.extinction.g;
    let k_x = summary.k_x();
    let [apcor_g, apcor_x] = options.aperture_correction;
    let [a_g, a_x] = options.galactic_extinction;

    let transform = transform_for(summary)?;

    let by_id_x: HashMap<usize, &PhotRecord> = x_records.iter().map(|r| (r.id, r)).collect();
    let mut sources = Vec::new();
    for rg in g_records {
        let Some(rx) = by_id_x.get(&rg.id) else {
            continue;
        };
        let g0 = rg.mag - k_g * summary.airmass_g + apcor_g;
        let x0 = rx.mag - k_x * summary.airmass_x + apcor_x;
        let (g, x) = transform(g0, x0);
        let (g, x) = (g - a_g, x - a_x);

        sources.push(CalibratedSource {
            id: rg.id,
            g_pos: (rg.xcen, rg.ycen),
            g,
            g_err: rg.merr,
            x_pos: (rx.xcen, rx.ycen),
            x,
            x_err: rx.merr,
            color: g - x,
        });
    }

    let limit = |mag: fn(&CalibratedSource) -> (f64, f64)| {
        sources
            .iter()
            .map(mag)
            .filter(|(_, err)| *err >= LIMIT_ERR)
            .map(|(m, _)| m)
            .reduce(f64::min)
    };
    let limit_g = limit(|s| (s.g, s.g_err));
    let limit_x = limit(|s| (s.x, s.x_err));

    if let Some(color) = median_color(&sources) {
        tracing::info!("Median (g-{}) = {:.4}", summary.band, color);
    }
    tracing::info!(
        "Calibrated {} sources; 5-sigma limit g = {:?}, {} = {:?}",
        sources.len(),
        limit_g,
        summary.band,
        limit_x
    );

    Ok(AppliedCalibration {
        sources,
        limit_g,
        limit_x,
    })
}

type Transform = Box<dyn Fn(f64, f64) -> (f64, f64)>;

/// Smallest usable |1 - eps_g + eps_x| of a zero-point transformation.
const DEGENERATE_DENOM: f64 = 1e-9;

/// Map extinction-corrected instrumental (g0, x0) to calibrated (g, x).
fn transform_for(summary: &CalibrationSummary) -> std::result::Result<Transform, CalibrationError> {
    let eps_x = summary.eps_x.value;
    let zp_x = summary.zp_x.value;

    match summary.method {
        CalibrationMethod::ColorTerm => {
            let mu = summary.mu_gx.ok_or(CalibrationError::MissingCoefficient("mu_gx"))?.value;
            let zp_gx = summary.zp_gx.ok_or(CalibrationError::MissingCoefficient("zp_gx"))?.value;
            Ok(Box::new(move |g0, x0| {
                let color = mu * (g0 - x0) + zp_gx;
                let x = x0 + eps_x * color + zp_x;
                (color + x, x)
            }))
        }
        CalibrationMethod::ZeroPoint => {
            let eps_g = summary.eps_g.ok_or(CalibrationError::MissingCoefficient("eps_g"))?.value;
            let zp_g = summary.zp_g.ok_or(CalibrationError::MissingCoefficient("zp_g"))?.value;
            // g - x = (g0 - x0) + (eps_g - eps_x)(g - x) + zp_g - zp_x, solved for g - x
            let denom = 1.0 - eps_g + eps_x;
            if denom.abs() < DEGENERATE_DENOM {
                return Err(CalibrationError::Degenerate("1 - eps_g + eps_x vanishes"));
            }
            Ok(Box::new(move |g0, x0| {
                let color = (g0 - x0 + zp_g - zp_x) / denom;
                (g0 + eps_g * color + zp_g, x0 + eps_x * color + zp_x)
            }))
        }
    }
}

fn median_color(sources: &[CalibratedSource]) -> Option<f64> {
    if sources.is_empty() {
        return None;
    }
    let colors: Vec<f64> = sources.iter().map(|s| s.color).collect();
    Some(crate::stats::median(&colors))
}

pub fn write_calibrated_mags(path: &Path, sources: &[CalibratedSource]) -> Result<()> {
    let mut out = String::with_capacity(100 * sources.len());
    for s in sources {
        let _ = writeln!(
            out,
            "{:8.2} {:8.2} {:12.3} {:12.3} {:8.2} {:8.2} {:12.3} {:12.3} {:12.3}",
            s.g_pos.0, s.g_pos.1, s.g, s.g_err, s.x_pos.0, s.x_pos.1, s.x, s.x_err, s.color
        );
    }
    std::fs::write(path, out).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}
