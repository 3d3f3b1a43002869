//! Aperture photometry at reference positions.
//!
//! Each star is re-centred from the marginal distributions inside a small
//! box, its sky is the median of an annulus, and the flux is summed over the
//! pixels whose centres fall inside the aperture. Stars with a non-positive
//! flux or a saturated pixel inside the aperture produce no record.

use std::fmt::Write as _;
use std::path::Path;

use glam::DVec2;
use rayon::prelude::*;

use crate::config::PhotometryConfig;
use crate::crossmatch::ReferenceList;
use crate::error::TableError;
use crate::fits::FrameImage;
use crate::stats;

/// 2.5 / ln(10): converts a relative flux error to a magnitude error.
const MAG_ERR_FACTOR: f64 = 1.0857;

const PHOT_HEADER: &str = "# id mag merr msky stdev rapert xcen ycen ifilter xairmass image";

/// Photometry parameters for one frame, with radii in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotometryParams {
    pub aperture: f64,
    pub annulus: f64,
    pub dannulus: f64,
    pub cbox: f64,
    pub maxshift: f64,
    pub datamax: f64,
    pub zmag: f64,
}

impl PhotometryParams {
    /// Scale the aperture and annulus with the frame's seeing.
    pub fn from_fwhm(fwhm: f64, config: &PhotometryConfig) -> Self {
        Self {
            aperture: config.aperture_factor * fwhm,
            annulus: config.annulus_factor * fwhm,
            dannulus: config.dannulus,
            cbox: config.cbox,
            maxshift: config.maxshift,
            datamax: config.datamax,
            zmag: config.zmag,
        }
    }
}

/// One row of a `.sdssphot` table.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotRecord {
    pub id: usize,
    pub mag: f64,
    pub merr: f64,
    pub msky: f64,
    pub stdev: f64,
    pub rapert: f64,
    pub xcen: f64,
    pub ycen: f64,
    pub ifilter: String,
    pub xairmass: Option<f64>,
    pub image: String,
}

/// Marginal-sum centroid inside a `cbox`-wide box around `position`.
///
/// Falls back to `position` if the box is empty or the shift exceeds `maxshift`.
pub fn centroid(image: &FrameImage, position: DVec2, cbox: f64, maxshift: f64) -> DVec2 {
    let half = (cbox / 2.0).floor() as i64;
    let cx = position.x.round() as i64;
    let cy = position.y.round() as i64;

    let x_min = (cx - half).max(1);
    let x_max = (cx + half).min(image.width as i64);
    let y_min = (cy - half).max(1);
    let y_max = (cy + half).min(image.height as i64);
    if x_min > x_max || y_min > y_max {
        return position;
    }

    let nx = (x_max - x_min + 1) as usize;
    let ny = (y_max - y_min + 1) as usize;
    let mut col = vec![0.0; nx];
    let mut row = vec![0.0; ny];
    for (j, y) in (y_min..=y_max).enumerate() {
        for (i, x) in (x_min..=x_max).enumerate() {
            let v = image.get(x as usize - 1, y as usize - 1);
            col[i] += v;
            row[j] += v;
        }
    }

    let (Some(xc), Some(yc)) = (marginal_center(&col, x_min), marginal_center(&row, y_min)) else {
        return position;
    };
    let center = DVec2::new(xc, yc);
    if center.distance(position) > maxshift {
        tracing::trace!(
            "Centroid shift {:.2} px exceeds maxshift, keeping ({:.2}, {:.2})",
            center.distance(position),
            position.x,
            position.y
        );
        return position;
    }
    center
}

/// Centre of a marginal distribution using only the part above its mean.
fn marginal_center(marginal: &[f64], origin: i64) -> Option<f64> {
    let mean = stats::mean(marginal);
    let (sum, total) = marginal
        .iter()
        .enumerate()
        .map(|(i, v)| ((origin + i as i64) as f64, v - mean))
        .filter(|(_, w)| *w > 0.0)
        .fold((0.0, 0.0), |(s, t), (pos, w)| (s + pos * w, t + w));
    (total > 0.0).then(|| sum / total)
}

/// Measure one star. Returns `None` when the star must be dropped.
pub fn measure(
    image: &FrameImage,
    id: usize,
    position: DVec2,
    params: &PhotometryParams,
) -> Option<PhotRecord> {
    let center = centroid(image, position, params.cbox, params.maxshift);

    let sky: Vec<f64> = image
        .ring_pixels(center, params.annulus, params.annulus + params.dannulus)
        .into_iter()
        .map(|(_, v)| v)
        .collect();
    if sky.is_empty() {
        tracing::debug!("Star {id}: empty sky annulus");
        return None;
    }
    let msky = stats::median(&sky);
    let stdev = stats::std_dev(&sky);
    let nsky = sky.len() as f64;

    let aperture = image.ring_pixels(center, 0.0, params.aperture);
    if aperture.is_empty() {
        return None;
    }
    if aperture.iter().any(|(_, v)| *v > params.datamax) {
        tracing::debug!("Star {id}: saturated");
        return None;
    }

    let area = aperture.len() as f64;
    let sum: f64 = aperture.iter().map(|(_, v)| v).sum();
    let flux = sum - area * msky;
    if flux <= 0.0 {
        tracing::debug!("Star {id}: non-positive flux {flux:.1}");
        return None;
    }

    let header = &image.header;
    let exptime = header.exptime.unwrap_or(1.0);
    let gain = header.gain.filter(|g| *g > 0.0).unwrap_or(1.0);

    let mag = params.zmag - 2.5 * flux.log10() + 2.5 * exptime.log10();
    let variance = flux / gain + area * stdev.powi(2) + area.powi(2) * stdev.powi(2) / nsky;
    let merr = MAG_ERR_FACTOR * variance.sqrt() / flux;

    Some(PhotRecord {
        id,
        mag,
        merr,
        msky,
        stdev,
        rapert: params.aperture,
        xcen: center.x,
        ycen: center.y,
        ifilter: header.filter.clone().unwrap_or_else(|| "INDEF".to_string()),
        xairmass: header.airmass,
        image: image.name(),
    })
}

/// Measure every reference star in parallel; dropped stars are omitted.
pub fn measure_all(
    image: &FrameImage,
    references: &ReferenceList,
    params: &PhotometryParams,
) -> Vec<PhotRecord> {
    let records: Vec<PhotRecord> = references
        .stars
        .par_iter()
        .filter_map(|star| measure(image, star.id, star.position(), params))
        .collect();

    tracing::info!(
        "Photometry on {}: {} of {} stars (aperture {:.2} px)",
        image.name(),
        records.len(),
        references.stars.len(),
        params.aperture
    );
    records
}

pub fn write_table(path: &Path, records: &[PhotRecord]) -> Result<(), TableError> {
    let mut out = String::with_capacity(96 * (records.len() + 1));
    out.push_str(PHOT_HEADER);
    out.push('\n');
    for r in records {
        let airmass = r
            .xairmass
            .map(|a| format!("{a:.4}"))
            .unwrap_or_else(|| "INDEF".to_string());
        let _ = writeln!(
            out,
            "{} {:.4} {:.4} {:.3} {:.3} {:.3} {:.3} {:.3} {} {} {}",
            r.id,
            r.mag,
            r.merr,
            r.msky,
            r.stdev,
            r.rapert,
            r.xcen,
            r.ycen,
            table_token(&r.ifilter),
            airmass,
            table_token(&r.image)
        );
    }
    std::fs::write(path, out).map_err(|e| TableError::io(path, e))
}

/// Single whitespace-free column value: blanks become `_`, empty text `INDEF`.
fn table_token(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "INDEF".to_string();
    }
    text.split_whitespace().collect::<Vec<_>>().join("_")
}

pub fn read_table(path: &Path) -> Result<Vec<PhotRecord>, TableError> {
    let text = std::fs::read_to_string(path).map_err(|e| TableError::io(path, e))?;

    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 11 {
            return Err(TableError::parse(
                path,
                idx + 1,
                format!("expected 11 columns, found {}", fields.len()),
            ));
        }
        let num = |i: usize| {
            fields[i]
                .parse::<f64>()
                .map_err(|e| TableError::parse(path, idx + 1, format!("'{}': {}", fields[i], e)))
        };

        records.push(PhotRecord {
            id: fields[0]
                .parse()
                .map_err(|e| TableError::parse(path, idx + 1, format!("id: {e}")))?,
            mag: num(1)?,
            merr: num(2)?,
            msky: num(3)?,
            stdev: num(4)?,
            rapert: num(5)?,
            xcen: num(6)?,
            ycen: num(7)?,
            ifilter: fields[8].to_string(),
            xairmass: if fields[9] == "INDEF" { None } else { Some(num(9)?) },
            image: fields[10].to_string(),
        });
    }
    Ok(records)
}
