//! Stellar profile measurement.
//!
//! For each reference position the profile step measures the local sky, the
//! flux and second moments inside the object radius, and fits a Gaussian to
//! the radial profile. The Gaussian gives the peak counts above sky (used to
//! reject faint and saturated stars) and the FWHM (used to size the
//! photometry apertures).
//!
//! Results are written as a whitespace-separated log, one row per reference
//! star in reference-list order, with `INDEF` for quantities that could not be
//! measured.

use std::fmt::Write as _;
use std::path::Path;

use glam::DVec2;
use rayon::prelude::*;

use crate::config::ProfileConfig;
use crate::crossmatch::ReferenceList;
use crate::error::TableError;
use crate::fits::FrameImage;
use crate::stats;

/// FWHM of a Gaussian in units of sigma, 2*sqrt(2 ln 2).
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045;

const CENTROID_ITERATIONS: usize = 10;

const LOG_HEADER: &str = "# x y mag flux sky npix rmom ellip pa peak fwhm";

/// Profile measurements of one star.
#[derive(Debug, Clone, PartialEq)]
pub struct StarProfile {
    /// 1-based reference id (row number in the reference list)
    pub id: usize,
    /// Measured centre, 1-based pixels
    pub x: f64,
    pub y: f64,
    pub mag: Option<f64>,
    pub flux: Option<f64>,
    pub sky: Option<f64>,
    /// Pixels inside the object radius
    pub npix: usize,
    /// Second-moment radius
    pub rmom: Option<f64>,
    pub ellip: Option<f64>,
    /// Position angle in degrees
    pub pa: Option<f64>,
    /// Fitted Gaussian peak above sky
    pub peak: Option<f64>,
    pub fwhm: Option<f64>,
}

impl StarProfile {
    fn unmeasured(id: usize, position: DVec2) -> Self {
        Self {
            id,
            x: position.x,
            y: position.y,
            mag: None,
            flux: None,
            sky: None,
            npix: 0,
            rmom: None,
            ellip: None,
            pa: None,
            peak: None,
            fwhm: None,
        }
    }
}

/// Measure the profile of the star near the 1-based `position`.
pub fn measure_profile(
    image: &FrameImage,
    id: usize,
    position: DVec2,
    config: &ProfileConfig,
) -> StarProfile {
    let sky_inner = config.radius + config.buffer;
    let sky_outer = sky_inner + config.width;

    let Some(mut sky) = local_sky(image, position, sky_inner, sky_outer) else {
        return StarProfile::unmeasured(id, position);
    };

    let mut center = position;
    if config.recenter {
        for _ in 0..CENTROID_ITERATIONS {
            match weighted_centroid(image, center, config.radius, sky) {
                Some(c) if c.distance(center) > 1e-3 => center = c,
                Some(c) => {
                    center = c;
                    break;
                }
                None => break,
            }
        }
        if let Some(s) = local_sky(image, center, sky_inner, sky_outer) {
            sky = s;
        }
    }

    let mut profile = StarProfile::unmeasured(id, center);
    profile.sky = Some(sky);

    let object = image.ring_pixels(center, 0.0, config.radius);
    profile.npix = object.len();
    if object.is_empty() {
        return profile;
    }

    let flux: f64 = object.iter().map(|(_, v)| v - sky).sum();
    profile.flux = Some(flux);
    if flux > 0.0 {
        profile.mag = Some(config.magzero - 2.5 * flux.log10());
    }

    if let Some((rmom, ellip, pa)) = moments(&object, center, sky) {
        profile.rmom = Some(rmom);
        profile.ellip = Some(ellip);
        profile.pa = Some(pa);
    }

    let radial = image.ring_pixels(center, 0.0, config.rplot);
    if let Some((peak, sigma)) = fit_gaussian_profile(&radial, center, sky) {
        profile.peak = Some(peak);
        profile.fwhm = Some(FWHM_PER_SIGMA * sigma);
    }

    profile
}

/// Measure every star of `references` in parallel, in list order.
pub fn measure_profiles(
    image: &FrameImage,
    references: &ReferenceList,
    config: &ProfileConfig,
) -> Vec<StarProfile> {
    let profiles: Vec<StarProfile> = references
        .stars
        .par_iter()
        .map(|star| measure_profile(image, star.id, star.position(), config))
        .collect();

    let measured = profiles.iter().filter(|p| p.fwhm.is_some()).count();
    tracing::info!(
        "Measured {} of {} profiles on {}",
        measured,
        profiles.len(),
        image.name()
    );
    profiles
}

/// Median FWHM over the stars where it could be measured.
pub fn median_fwhm(profiles: &[StarProfile]) -> Option<f64> {
    let values: Vec<f64> = profiles
        .iter()
        .filter_map(|p| p.fwhm)
        .filter(|f| f.is_finite() && *f > 0.0)
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(stats::median(&values))
    }
}

fn local_sky(image: &FrameImage, center: DVec2, inner: f64, outer: f64) -> Option<f64> {
    let values: Vec<f64> = image
        .ring_pixels(center, inner, outer)
        .into_iter()
        .map(|(_, v)| v)
        .collect();
    (!values.is_empty()).then(|| stats::median(&values))
}

/// Intensity-weighted centre of the sky-subtracted light within `radius`.
fn weighted_centroid(image: &FrameImage, center: DVec2, radius: f64, sky: f64) -> Option<DVec2> {
    let (sum, total) = image
        .ring_pixels(center, 0.0, radius)
        .into_iter()
        .map(|(p, v)| (p, v - sky))
        .filter(|(_, w)| *w > 0.0)
        .fold((DVec2::ZERO, 0.0), |(sum, total), (p, w)| {
            (sum + p * w, total + w)
        });
    (total > 0.0).then(|| sum / total)
}

/// Second-moment radius, ellipticity and position angle (degrees).
fn moments(pixels: &[(DVec2, f64)], center: DVec2, sky: f64) -> Option<(f64, f64, f64)> {
    let mut total = 0.0;
    let (mut mxx, mut myy, mut mxy) = (0.0, 0.0, 0.0);
    for (p, v) in pixels {
        let w = v - sky;
        if w <= 0.0 {
            continue;
        }
        let d = *p - center;
        total += w;
        mxx += w * d.x * d.x;
        myy += w * d.y * d.y;
        mxy += w * d.x * d.y;
    }
    if total <= 0.0 {
        return None;
    }
    mxx /= total;
    myy /= total;
    mxy /= total;

    let r2 = mxx + myy;
    if r2 <= 0.0 {
        return None;
    }
    let ellip = ((mxx - myy).powi(2) + (2.0 * mxy).powi(2)).sqrt() / r2;
    let pa = 0.5 * (2.0 * mxy).atan2(mxx - myy).to_degrees();
    Some((r2.sqrt(), ellip, pa))
}

/// Fit `ln(I - sky) = ln(peak) - r^2 / (2 sigma^2)` by weighted least squares.
///
/// Weights are the sky-subtracted intensities, so the core dominates and
/// noisy wings contribute little. Returns (peak, sigma).
fn fit_gaussian_profile(pixels: &[(DVec2, f64)], center: DVec2, sky: f64) -> Option<(f64, f64)> {
    let mut sw = 0.0;
    let (mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0);
    let mut n = 0usize;

    for (p, v) in pixels {
        let intensity = v - sky;
        if intensity <= 0.0 {
            continue;
        }
        let r2 = p.distance_squared(center);
        let ln_i = intensity.ln();
        let w = intensity;

        sw += w;
        sx += w * r2;
        sy += w * ln_i;
        sxx += w * r2 * r2;
        sxy += w * r2 * ln_i;
        n += 1;
    }

    if n < 3 {
        return None;
    }
    let denom = sw * sxx - sx * sx;
    if denom.abs() < f64::EPSILON {
        return None;
    }
    let slope = (sw * sxy - sx * sy) / denom;
    let intercept = (sy - slope * sx) / sw;
    if slope >= 0.0 {
        return None;
    }

    let sigma = (-1.0 / (2.0 * slope)).sqrt();
    Some((intercept.exp(), sigma))
}

// =============================================================================
// Log file
// =============================================================================

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.precision$}"),
        _ => "INDEF".to_string(),
    }
}

fn parse_opt(field: &str) -> Result<Option<f64>, String> {
    if field == "INDEF" {
        return Ok(None);
    }
    field
        .parse::<f64>()
        .map(Some)
        .map_err(|e| format!("'{field}': {e}"))
}

/// Write profile rows in id order.
pub fn write_log(path: &Path, profiles: &[StarProfile]) -> Result<(), TableError> {
    let mut out = String::with_capacity(64 * (profiles.len() + 1));
    out.push_str(LOG_HEADER);
    out.push('\n');
    for p in profiles {
        let _ = writeln!(
            out,
            "{:.2} {:.2} {} {} {} {} {} {} {} {} {}",
            p.x,
            p.y,
            fmt_opt(p.mag, 3),
            fmt_opt(p.flux, 1),
            fmt_opt(p.sky, 2),
            p.npix,
            fmt_opt(p.rmom, 3),
            fmt_opt(p.ellip, 3),
            fmt_opt(p.pa, 1),
            fmt_opt(p.peak, 1),
            fmt_opt(p.fwhm, 3),
        );
    }
    std::fs::write(path, out).map_err(|e| TableError::io(path, e))
}

/// Read a profile log; ids are assigned from row order.
pub fn read_log(path: &Path) -> Result<Vec<StarProfile>, TableError> {
    let text = std::fs::read_to_string(path).map_err(|e| TableError::io(path, e))?;

    let mut profiles = Vec::new();
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
        let opt = |i: usize| parse_opt(fields[i]).map_err(|r| TableError::parse(path, idx + 1, r));
        let num = |i: usize| {
            opt(i)?.ok_or_else(|| TableError::parse(path, idx + 1, "position is INDEF"))
        };

        profiles.push(StarProfile {
            id: profiles.len() + 1,
            x: num(0)?,
            y: num(1)?,
            mag: opt(2)?,
            flux: opt(3)?,
            sky: opt(4)?,
            npix: fields[5]
                .parse()
                .map_err(|e| TableError::parse(path, idx + 1, format!("npix: {e}")))?,
            rmom: opt(6)?,
            ellip: opt(7)?,
            pa: opt(8)?,
            peak: opt(9)?,
            fwhm: opt(10)?,
        });
    }
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SyntheticFrame;

    fn star_frame(sigma: f64, amplitude: f64) -> FrameImage {
        let mut frame = SyntheticFrame::new(80, 80).with_sky(100.0);
        frame.add_star(40.3, 39.6, sigma, amplitude);
        frame.to_image()
    }

    #[test]
    fn test_gaussian_fwhm_and_peak() {
        let image = star_frame(2.0, 5000.0);
        let p = measure_profile(&image, 1, DVec2::new(40.0, 40.0), &ProfileConfig::default());

        let fwhm = p.fwhm.unwrap();
        assert!((fwhm - 2.0 * FWHM_PER_SIGMA).abs() < 0.05, "fwhm = {fwhm}");
        assert!((p.peak.unwrap() - 5000.0).abs() < 50.0, "peak = {:?}", p.peak);
        assert!((p.sky.unwrap() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_recentering_finds_star() {
        let image = star_frame(1.5, 3000.0);
        let p = measure_profile(&image, 1, DVec2::new(41.0, 39.0), &ProfileConfig::default());
        assert!((p.x - 40.3).abs() < 0.1, "x = {}", p.x);
        assert!((p.y - 39.6).abs() < 0.1, "y = {}", p.y);
    }

    #[test]
    fn test_round_star_moments() {
        let image = star_frame(2.0, 5000.0);
        let p = measure_profile(&image, 1, DVec2::new(40.0, 40.0), &ProfileConfig::default());
        assert!(p.ellip.unwrap() < 0.05);
        assert!(p.rmom.unwrap() > 0.0);
        assert!(p.flux.unwrap() > 0.0);
        assert!(p.mag.unwrap() < 25.0);
        assert!(p.npix > 40);
    }

    #[test]
    fn test_blank_sky_has_no_fwhm() {
        let image = SyntheticFrame::new(60, 60).with_sky(50.0).to_image();
        let p = measure_profile(&image, 3, DVec2::new(30.0, 30.0), &ProfileConfig::default());
        assert_eq!(p.id, 3);
        assert!(p.fwhm.is_none());
        assert!(p.peak.is_none());
    }

    #[test]
    fn test_off_frame_is_unmeasured() {
        let image = SyntheticFrame::new(30, 30).to_image();
        let p = measure_profile(&image, 1, DVec2::new(500.0, 500.0), &ProfileConfig::default());
        assert!(p.sky.is_none());
        assert_eq!(p.npix, 0);
    }

    #[test]
    fn test_median_fwhm_skips_missing() {
        let mut a = StarProfile::unmeasured(1, DVec2::ZERO);
        let mut b = StarProfile::unmeasured(2, DVec2::ZERO);
        let c = StarProfile::unmeasured(3, DVec2::ZERO);
        let mut d = StarProfile::unmeasured(4, DVec2::ZERO);
        a.fwhm = Some(3.0);
        b.fwhm = Some(5.0);
        d.fwhm = Some(4.0);

        assert_eq!(median_fwhm(&[a, b, c.clone(), d]), Some(4.0));
        assert_eq!(median_fwhm(&[c]), None);
    }

    #[test]
    fn test_log_roundtrip_keeps_indef() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field_g_fwhmCAL.log");

        let image = star_frame(2.0, 5000.0);
        let measured = measure_profile(&image, 1, DVec2::new(40.0, 40.0), &ProfileConfig::default());
        let missing = StarProfile::unmeasured(2, DVec2::new(12.5, 7.25));
        write_log(&path, &[measured.clone(), missing]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(LOG_HEADER));
        assert!(text.contains("INDEF"));

        let read = read_log(&path).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].id, 2);
        assert!(read[1].fwhm.is_none());
        assert!((read[1].y - 7.25).abs() < 1e-9);
        assert!((read[0].fwhm.unwrap() - measured.fwhm.unwrap()).abs() < 1e-3);
    }

    #[test]
    fn test_read_log_rejects_short_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.log");
        std::fs::write(&path, "# header\n1.0 2.0 3.0\n").unwrap();
        assert!(matches!(
            read_log(&path),
            Err(TableError::Parse { line: 2, .. })
        ));
    }
}
