//! Diagnostic SVG plots of the calibration fits and star distributions.

use std::error::Error as StdError;
use std::path::Path;

use glam::DVec2;
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::calibrate::{Band, BandZeroPoint, ColorTermCalibration, ZeroPointCalibration};
use crate::error::{Error, Result};
use crate::fit::{ConfidenceBand, LinearFit};
use crate::stats::BinnedStatistic2d;

type DrawResult = std::result::Result<(), Box<dyn StdError>>;
type Area<'a> = DrawingArea<SVGBackend<'a>, Shift>;

const PANEL_SIZE: (u32, u32) = (1000, 900);
const MAP_SIZE: (u32, u32) = (900, 900);
/// Colour scale limit of zero-point offsets in the detector maps, in mag
const MAP_SCALE: f64 = 0.1;

fn plot_error(path: &Path) -> impl Fn(Box<dyn StdError>) -> Error + '_ {
    move |e| Error::Plot {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// One scatter panel with a fitted line and its confidence band.
struct FitPanel<'a> {
    title: String,
    x_desc: String,
    y_desc: String,
    x: &'a [f64],
    y: &'a [f64],
    /// Points rejected by sigma clipping are drawn in red
    kept: Option<&'a [bool]>,
    fit: &'a LinearFit,
    band: &'a ConfidenceBand,
    y_range: Option<(f64, f64)>,
    /// Magnitudes grow downwards
    invert_y: bool,
}

fn padded_range(values: impl Iterator<Item = f64>, pad: f64) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if lo > hi {
        return (-1.0, 1.0);
    }
    let span = (hi - lo).max(1e-3);
    (lo - pad * span, hi + pad * span)
}

fn draw_fit_panel(area: &Area, panel: &FitPanel) -> DrawResult {
    let grid = &panel.band.grid;
    let (x_lo, x_hi) = padded_range(
        panel.x.iter().copied().chain(grid.first().copied()).chain(grid.last().copied()),
        0.02,
    );
    let (y_lo, y_hi) = panel
        .y_range
        .unwrap_or_else(|| padded_range(panel.y.iter().copied(), 0.1));

    // inverted axes are drawn on -y and relabelled
    let sign = if panel.invert_y { -1.0 } else { 1.0 };
    let (y_min, y_max) = if panel.invert_y {
        (-y_hi, -y_lo)
    } else {
        (y_lo, y_hi)
    };

    let mut chart = ChartBuilder::on(area)
        .caption(&panel.title, ("sans-serif", 22))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_lo..x_hi, y_min..y_max)?;

    let y_label = |v: &f64| format!("{:.2}", sign * v);
    chart
        .configure_mesh()
        .x_desc(panel.x_desc.as_str())
        .y_desc(panel.y_desc.as_str())
        .y_label_formatter(&y_label)
        .draw()?;

    let in_range = |x: f64| x >= x_lo && x <= x_hi;
    let upper = panel.band.upper();
    let lower = panel.band.lower();
    let outline: Vec<(f64, f64)> = grid
        .iter()
        .zip(&upper)
        .filter(|(x, _)| in_range(**x))
        .map(|(x, y)| (*x, sign * y))
        .chain(
            grid.iter()
                .zip(&lower)
                .rev()
                .filter(|(x, _)| in_range(**x))
                .map(|(x, y)| (*x, sign * y)),
        )
        .collect();
    chart.draw_series(std::iter::once(Polygon::new(outline, BLUE.mix(0.2).filled())))?;

    chart.draw_series(LineSeries::new(
        [x_lo, x_hi].map(|x| (x, sign * panel.fit.predict(x))),
        BLUE.stroke_width(2),
    ))?;

    let points = panel.x.iter().zip(panel.y).enumerate().map(|(j, (x, y))| {
        let kept = panel.kept.is_none_or(|k| k[j]);
        let color = if kept { BLACK } else { RED };
        Circle::new((*x, sign * y), 3, color.filled())
    });
    chart.draw_series(points)?;

    Ok(())
}

// =============================================================================
// Colour-term method
// =============================================================================

/// Two panels: `g - x` against `g0 - x0` and `x - x0` against `g - x`.
pub fn plot_color_term_fits(path: &Path, cal: &ColorTermCalibration) -> Result<()> {
    draw_color_term_fits(path, cal).map_err(plot_error(path))
}

fn draw_color_term_fits(path: &Path, cal: &ColorTermCalibration) -> DrawResult {
    let b = cal.band;
    let root = SVGBackend::new(path, PANEL_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let areas = root.split_evenly((2, 1));

    let mu = cal.mu();
    draw_fit_panel(
        &areas[0],
        &FitPanel {
            title: format!("mu_g{b} = {:.4} +- {:.4}", mu.value, mu.error),
            x_desc: format!("g0 - {b}0 (instrumental)"),
            y_desc: format!("g - {b} (SDSS)"),
            x: &cal.instrumental_color,
            y: &cal.catalog_color,
            kept: Some(&cal.color_fit.kept),
            fit: &cal.color_fit.fit,
            band: &cal.color_band,
            y_range: None,
            invert_y: false,
        },
    )?;

    let eps = cal.eps();
    let zp = cal.zp().value;
    draw_fit_panel(
        &areas[1],
        &FitPanel {
            title: format!("eps_g{b} = {:.4} +- {:.4}, ZP_{b} = {zp:.4}", eps.value, eps.error),
            x_desc: format!("g - {b} (SDSS)"),
            y_desc: format!("{b} - {b}0"),
            x: &cal.catalog_color,
            y: &cal.delta_x,
            kept: Some(&cal.magnitude_fit.kept),
            fit: &cal.magnitude_fit.fit,
            band: &cal.magnitude_band,
            y_range: Some((zp - 1.0, zp + 1.0)),
            invert_y: true,
        },
    )?;

    root.present()?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}

/// Positions of the calibration stars on the frame.
pub fn plot_star_map(path: &Path, title: &str, positions: &[DVec2], frame: (usize, usize)) -> Result<()> {
    draw_star_map(path, title, positions, frame).map_err(plot_error(path))
}

fn draw_star_map(path: &Path, title: &str, positions: &[DVec2], frame: (usize, usize)) -> DrawResult {
    let root = SVGBackend::new(path, MAP_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 22))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..frame.0 as f64, 0.0..frame.1 as f64)?;
    chart.configure_mesh().x_desc("x [px]").y_desc("y [px]").draw()?;
    chart.draw_series(
        positions
            .iter()
            .map(|p| Circle::new((p.x, p.y), 5, BLUE.stroke_width(1))),
    )?;

    root.present()?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}

/// Calibrated colour-magnitude diagram of all matched stars.
pub fn plot_cmd(path: &Path, band: Band, cmd: &[(f64, f64)]) -> Result<()> {
    draw_cmd(path, band, cmd).map_err(plot_error(path))
}

fn draw_cmd(path: &Path, band: Band, cmd: &[(f64, f64)]) -> DrawResult {
    let root = SVGBackend::new(path, MAP_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let (c_lo, c_hi) = padded_range(cmd.iter().map(|(c, _)| *c), 0.05);
    let (m_lo, m_hi) = padded_range(cmd.iter().map(|(_, m)| *m), 0.05);

    let mut chart = ChartBuilder::on(&root)
        .caption(format!("calibrated CMD ({} stars)", cmd.len()), ("sans-serif", 22))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(c_lo..c_hi, -m_hi..-m_lo)?;
    chart
        .configure_mesh()
        .x_desc(format!("g - {band}"))
        .y_desc(band.to_string())
        .y_label_formatter(&|v: &f64| format!("{:.1}", -v))
        .draw()?;
    chart.draw_series(cmd.iter().map(|(c, m)| Circle::new((*c, -m), 3, BLACK.filled())))?;

    root.present()?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}

// =============================================================================
// Zero-point method
// =============================================================================

/// `g - g0` and `x - x0` against the catalog colour with their fits.
pub fn plot_zero_point_fits(path: &Path, cal: &ZeroPointCalibration) -> Result<()> {
    draw_zero_point_fits(path, cal).map_err(plot_error(path))
}

fn zero_point_panel<'a>(label: &str, color_desc: String, color: &'a [f64], fit: &'a BandZeroPoint) -> FitPanel<'a> {
    let eps = fit.eps();
    let zp = fit.zp();
    FitPanel {
        title: format!(
            "eps_{label} = {:.4} +- {:.4}, ZP_{label} = {:.4} +- {:.4}",
            eps.value, eps.error, zp.value, zp.error
        ),
        x_desc: color_desc,
        y_desc: format!("{label} - {label}0"),
        x: color,
        y: &fit.delta,
        kept: None,
        fit: &fit.fit,
        band: &fit.band,
        y_range: None,
        invert_y: false,
    }
}

fn draw_zero_point_fits(path: &Path, cal: &ZeroPointCalibration) -> DrawResult {
    let b = cal.band.to_string();
    let root = SVGBackend::new(path, PANEL_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let areas = root.split_evenly((2, 1));

    let color_desc = format!("g - {b} (SDSS)");
    draw_fit_panel(&areas[0], &zero_point_panel("g", color_desc.clone(), &cal.catalog_color, &cal.g))?;
    draw_fit_panel(&areas[1], &zero_point_panel(&b, color_desc, &cal.catalog_color, &cal.x))?;

    root.present()?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}

/// Per-star zero points over the detector, one panel per band, with the
/// statistics of each map region written into it.
pub fn plot_zero_point_maps(path: &Path, cal: &ZeroPointCalibration) -> Result<()> {
    draw_zero_point_maps(path, cal).map_err(plot_error(path))
}

/// Blue for negative offsets, red for positive, saturating at `MAP_SCALE`.
fn offset_color(offset: f64) -> HSLColor {
    let t = ((offset / MAP_SCALE).clamp(-1.0, 1.0) + 1.0) / 2.0;
    HSLColor((1.0 - t) * 240.0 / 360.0, 0.85, 0.45)
}

fn draw_zero_point_map(area: &Area, label: &str, positions: &[DVec2], fit: &BandZeroPoint) -> DrawResult {
    let map = &fit.map;
    let BinnedStatistic2d { x_edges, y_edges, .. } = &map.count;
    let (x_lo, x_hi) = (x_edges[0], x_edges[x_edges.len() - 1]);
    let (y_lo, y_hi) = (y_edges[0], y_edges[y_edges.len() - 1]);

    let mut chart = ChartBuilder::on(area)
        .caption(
            format!("ZP_{label} - median ({:.4}), std {:.4}", map.global_median, fit.star_zp_std()),
            ("sans-serif", 20),
        )
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)?;
    chart.configure_mesh().x_desc("x [px]").y_desc("y [px]").draw()?;

    for x in &x_edges[1..x_edges.len() - 1] {
        chart.draw_series(LineSeries::new([(*x, y_lo), (*x, y_hi)], BLACK.mix(0.4)))?;
    }
    for y in &y_edges[1..y_edges.len() - 1] {
        chart.draw_series(LineSeries::new([(x_lo, *y), (x_hi, *y)], BLACK.mix(0.4)))?;
    }

    chart.draw_series(positions.iter().zip(&fit.star_zp).map(|(p, zp)| {
        Circle::new((p.x, p.y), 5, offset_color(zp - map.global_median).filled())
    }))?;

    let font = ("sans-serif", 13).into_font();
    for ix in 0..map.bins() {
        for iy in 0..map.bins() {
            let n = map.count.values[ix][iy];
            if n < 1.0 {
                continue;
            }
            let median = map.median.values[ix][iy];
            let lines = [
                format!("mean {:.3}", map.mean.values[ix][iy]),
                format!("median {median:.3}"),
                format!("ota-global {:.3}", median - map.global_median),
                format!("std {:.3}", map.std.values[ix][iy]),
                format!("N {n:.0}"),
            ];
            let x0 = x_edges[ix] + 0.05 * (x_edges[ix + 1] - x_edges[ix]);
            let dy = (y_edges[iy + 1] - y_edges[iy]) / 7.0;
            for (k, line) in lines.into_iter().enumerate() {
                let y = y_edges[iy + 1] - dy * (k as f64 + 1.0);
                chart.draw_series(std::iter::once(Text::new(line, (x0, y), font.clone())))?;
            }
        }
    }
    Ok(())
}

fn draw_zero_point_maps(path: &Path, cal: &ZeroPointCalibration) -> DrawResult {
    let root = SVGBackend::new(path, (MAP_SIZE.0 * 2, MAP_SIZE.1)).into_drawing_area();
    root.fill(&WHITE)?;
    let areas = root.split_evenly((1, 2));

    draw_zero_point_map(&areas[0], "g", &cal.positions, &cal.g)?;
    draw_zero_point_map(&areas[1], &cal.band.to_string(), &cal.positions, &cal.x)?;

    root.present()?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}
