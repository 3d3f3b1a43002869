//! End-to-end calibration of one g / second-band image pair.
//!
//! Every step writes its product next to the images and is skipped on later
//! runs when that product already exists, unless the pipeline is forced:
//!
//! | step                  | products                                |
//! |-----------------------|-----------------------------------------|
//! | `download_catalog`    | `<image>.sdss`, `<image>.sdssxy`        |
//! | `measure_fwhm`        | `<image>_fwhmCAL.log`                   |
//! | `measure_photometry`  | `<image>_cal.sdssphot`                  |
//! | `calibrate`           | help file, JSON summary, plots          |

use std::cell::OnceCell;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::calibrate::{
    Band, CalibrationError, CalibrationMethod, ColorTermCalibration, InstrumentalSet,
    ZeroPointCalibration,
};
use crate::catalog::{self, CatalogSource, StarSelection};
use crate::config::CalibrationConfig;
use crate::crossmatch::{self, MatchedStar, ReferenceList};
use crate::error::{Error, Result};
use crate::fits::{self, FrameHeader, FrameImage};
use crate::photometry::{self, PhotRecord, PhotometryParams};
use crate::plot;
use crate::profile::{self, StarProfile};
use crate::report::{self, CalibrationSummary};
use crate::wcs::Wcs;

/// Names of every file the pipeline reads or writes for an image pair.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPaths {
    /// File stem of the g image up to the first `_`
    pub root: String,
    pub image_g: PathBuf,
    pub image_x: PathBuf,
    pub catalog_g: PathBuf,
    pub catalog_x: PathBuf,
    pub references_g: PathBuf,
    pub references_x: PathBuf,
    pub fwhm_log_g: PathBuf,
    pub fwhm_log_x: PathBuf,
    pub photometry_g: PathBuf,
    pub photometry_x: PathBuf,
    pub help_color_term: PathBuf,
    pub help_zero_point: PathBuf,
    pub summary_json: PathBuf,
    pub fit_plot: PathBuf,
    pub star_map_plot: PathBuf,
    pub cmd_plot: PathBuf,
    pub zero_point_fit_plot: PathBuf,
    pub zero_point_map_plot: PathBuf,
    pub star_positions: PathBuf,
}

impl FieldPaths {
    pub fn new(image_g: &Path, image_x: &Path) -> Self {
        let field = |suffix: &str| common::field_product_path(image_g, suffix);
        let star_positions = image_g.with_file_name("photcal_stars.pos");
        Self {
            root: common::field_root(image_g),
            image_g: image_g.to_path_buf(),
            image_x: image_x.to_path_buf(),
            catalog_g: common::sidecar_path(image_g, ".sdss"),
            catalog_x: common::sidecar_path(image_x, ".sdss"),
            references_g: common::sidecar_path(image_g, ".sdssxy"),
            references_x: common::sidecar_path(image_x, ".sdssxy"),
            fwhm_log_g: common::sidecar_path(image_g, "_fwhmCAL.log"),
            fwhm_log_x: common::sidecar_path(image_x, "_fwhmCAL.log"),
            photometry_g: common::sidecar_path(image_g, "_cal.sdssphot"),
            photometry_x: common::sidecar_path(image_x, "_cal.sdssphot"),
            help_color_term: field("_help.txt"),
            help_zero_point: field("_help_js.txt"),
            summary_json: field("_calibration.json"),
            fit_plot: field("_photcal.svg"),
            star_map_plot: field("_photmap.svg"),
            cmd_plot: field("_photcmd.svg"),
            zero_point_fit_plot: field("_photcal_js.svg"),
            zero_point_map_plot: field("_zpmap_js.svg"),
            star_positions,
        }
    }

    /// The default pair `<DIR>_g.fits` / `<DIR>_i.fits` inside `dir`.
    pub fn from_directory(dir: &Path) -> Option<Self> {
        let name = common::file_utils::directory_field_name(dir)?;
        Some(Self::new(
            &dir.join(format!("{name}_g.fits")),
            &dir.join(format!("{name}_i.fits")),
        ))
    }

    pub fn help_file(&self, method: CalibrationMethod) -> &Path {
        match method {
            CalibrationMethod::ColorTerm => &self.help_color_term,
            CalibrationMethod::ZeroPoint => &self.help_zero_point,
        }
    }
}

/// What a full run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub summary: CalibrationSummary,
    pub n_references: usize,
    pub n_matched: usize,
    pub help_file: PathBuf,
}

pub struct Pipeline {
    paths: FieldPaths,
    config: CalibrationConfig,
    catalog: CatalogSource,
    force: bool,
    write_headers: bool,
    image_g: OnceCell<FrameImage>,
    image_x: OnceCell<FrameImage>,
}

impl Pipeline {
    pub fn new(image_g: impl AsRef<Path>, image_x: impl AsRef<Path>, config: CalibrationConfig) -> Self {
        let catalog = CatalogSource::from_config(&config.query);
        Self {
            paths: FieldPaths::new(image_g.as_ref(), image_x.as_ref()),
            config,
            catalog,
            force: false,
            write_headers: false,
            image_g: OnceCell::new(),
            image_x: OnceCell::new(),
        }
    }

    /// Recompute every step even when its output exists.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_catalog_source(mut self, catalog: CatalogSource) -> Self {
        self.catalog = catalog;
        self
    }

    /// Store the coefficients in both image headers after calibrating.
    pub fn with_header_update(mut self, write_headers: bool) -> Self {
        self.write_headers = write_headers;
        self
    }

    pub fn paths(&self) -> &FieldPaths {
        &self.paths
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    fn reuse(&self, products: &[&Path]) -> bool {
        !self.force && products.iter().all(|p| p.exists())
    }

    fn image(&self, second: bool) -> Result<&FrameImage> {
        let (cell, path) = if second {
            (&self.image_x, &self.paths.image_x)
        } else {
            (&self.image_g, &self.paths.image_g)
        };
        if let Some(image) = cell.get() {
            return Ok(image);
        }
        let image = FrameImage::load(path)?;
        Ok(cell.get_or_init(|| image))
    }

    /// Query the catalog for the field and project the selected stars into both frames.
    pub fn download_catalog(&self) -> Result<(ReferenceList, ReferenceList)> {
        let p = &self.paths;
        if self.reuse(&[&p.references_g, &p.references_x]) {
            tracing::info!("Using existing {}", p.references_g.display());
            return Ok((
                ReferenceList::read(&p.references_g)?,
                ReferenceList::read(&p.references_x)?,
            ));
        }

        let wcs_g = Wcs::from_header(&FrameHeader::read(&p.image_g)?);
        let wcs_x = Wcs::from_header(&FrameHeader::read(&p.image_x)?);

        let stars = if self.reuse(&[&p.catalog_g]) {
            tracing::info!("Using cached catalog {}", p.catalog_g.display());
            catalog::read_csv_file(&p.catalog_g)?
        } else {
            let (ra, dec) = wcs_g.center();
            let radius = wcs_g.query_radius_arcmin().max(wcs_x.query_radius_arcmin());
            let (csv, stars) = self.catalog.query_field(ra, dec, radius)?;
            catalog::write_csv_file(&p.catalog_g, &csv)?;
            catalog::write_csv_file(&p.catalog_x, &csv)?;
            stars
        };

        let selected = StarSelection::from_config(&self.config.query).select(&stars);
        let (refs_g, refs_x) =
            ReferenceList::project_pair(&selected, &wcs_g, &wcs_x, self.config.query.border);
        if refs_g.is_empty() {
            tracing::warn!("No catalog stars fall inside both frames");
        }

        refs_g.write(&p.references_g)?;
        refs_x.write(&p.references_x)?;
        Ok((refs_g, refs_x))
    }

    /// Stellar profiles at the reference positions of both frames.
    pub fn measure_fwhm(
        &self,
        refs_g: &ReferenceList,
        refs_x: &ReferenceList,
    ) -> Result<(Vec<StarProfile>, Vec<StarProfile>)> {
        let p = &self.paths;
        if self.reuse(&[&p.fwhm_log_g, &p.fwhm_log_x]) {
            tracing::info!("Using existing {}", p.fwhm_log_g.display());
            return Ok((profile::read_log(&p.fwhm_log_g)?, profile::read_log(&p.fwhm_log_x)?));
        }

        let profiles_g = profile::measure_profiles(self.image(false)?, refs_g, &self.config.profile);
        profile::write_log(&p.fwhm_log_g, &profiles_g)?;
        let profiles_x = profile::measure_profiles(self.image(true)?, refs_x, &self.config.profile);
        profile::write_log(&p.fwhm_log_x, &profiles_x)?;
        Ok((profiles_g, profiles_x))
    }

    /// Aperture photometry of both frames with apertures scaled to each frame's median FWHM.
    pub fn measure_photometry(
        &self,
        refs: [&ReferenceList; 2],
        profiles: [&[StarProfile]; 2],
    ) -> Result<(Vec<PhotRecord>, Vec<PhotRecord>)> {
        let p = &self.paths;
        if self.reuse(&[&p.photometry_g, &p.photometry_x]) {
            tracing::info!("Using existing {}", p.photometry_g.display());
            return Ok((
                photometry::read_table(&p.photometry_g)?,
                photometry::read_table(&p.photometry_x)?,
            ));
        }

        let measure = |k: usize, out: &Path| -> Result<Vec<PhotRecord>> {
            let image = self.image(k == 1)?;
            let fwhm = profile::median_fwhm(profiles[k]).ok_or(CalibrationError::TooFewStars {
                stage: "FWHM measurement",
                found: 0,
                needed: 1,
            })?;
            tracing::info!("Median FWHM of {}: {:.3} px", image.name(), fwhm);

            let params = PhotometryParams::from_fwhm(fwhm, &self.config.photometry);
            let records = photometry::measure_all(image, refs[k], &params);
            photometry::write_table(out, &records)?;
            Ok(records)
        };
        Ok((measure(0, &p.photometry_g)?, measure(1, &p.photometry_x)?))
    }

    /// Fit the transformation, then write the help file, summary, plots and
    /// (when enabled) header keywords.
    ///
    /// An existing help file of `method` is read back instead of refitting.
    pub fn calibrate(&self, method: CalibrationMethod, matched: Vec<MatchedStar>) -> Result<CalibrationSummary> {
        let p = &self.paths;
        let help_file = p.help_file(method);
        if self.reuse(&[help_file]) {
            tracing::info!("Using existing {}", help_file.display());
            return Ok(report::read_help_file(help_file)?);
        }

        let set = InstrumentalSet::new(matched, &self.config)?;

        let (summary, selected) = match method {
            CalibrationMethod::ColorTerm => {
                let cal = ColorTermCalibration::run(&set, &self.config)?;
                let summary = CalibrationSummary::from_color_term(&p.root, &set, &cal, &self.config);
                let selected: Vec<_> = cal.selected.iter().map(|&j| set.position(j)).collect();

                plot::plot_color_term_fits(&p.fit_plot, &cal)?;
                let frame = self.frame_size()?;
                plot::plot_star_map(&p.star_map_plot, &format!("{} calibration stars", p.root), &selected, frame)?;
                plot::plot_cmd(&p.cmd_plot, set.band, &cal.cmd)?;
                (summary, selected)
            }
            CalibrationMethod::ZeroPoint => {
                let cal = ZeroPointCalibration::run(&set, &self.config)?;
                let summary = CalibrationSummary::from_zero_point(&p.root, &set, &cal, &self.config);

                plot::plot_zero_point_fits(&p.zero_point_fit_plot, &cal)?;
                plot::plot_zero_point_maps(&p.zero_point_map_plot, &cal)?;
                (summary, cal.positions.clone())
            }
        };

        report::write_help_file(p.help_file(method), &summary)?;
        summary.write_json(&p.summary_json)?;
        write_positions(&p.star_positions, &selected)?;

        if self.write_headers {
            self.write_header_keywords(&summary)?;
        }
        Ok(summary)
    }

    fn frame_size(&self) -> Result<(usize, usize)> {
        let header = FrameHeader::read(&self.paths.image_g)?;
        Ok((header.naxis1, header.naxis2))
    }

    /// Store the coefficients in the headers of both images.
    pub fn write_header_keywords(&self, summary: &CalibrationSummary) -> Result<()> {
        fits::write_calibration_keywords(&self.paths.image_g, &summary.header_keywords(Band::G))?;
        fits::write_calibration_keywords(&self.paths.image_x, &summary.header_keywords(summary.band))?;
        tracing::info!("Wrote calibration keywords to both image headers");
        Ok(())
    }

    /// Run every step in order.
    pub fn run(&self, method: CalibrationMethod) -> Result<PipelineOutcome> {
        tracing::info!(
            "Calibrating {} + {} ({method})",
            self.paths.image_g.display(),
            self.paths.image_x.display()
        );

        let (refs_g, refs_x) = self.download_catalog()?;
        let (profiles_g, profiles_x) = self.measure_fwhm(&refs_g, &refs_x)?;
        let (phot_g, phot_x) =
            self.measure_photometry([&refs_g, &refs_x], [profiles_g.as_slice(), profiles_x.as_slice()])?;

        let matched = crossmatch::match_measurements(&refs_g, &phot_g, &phot_x, &profiles_g, &profiles_x);
        tracing::info!("{} stars measured in both frames", matched.len());
        let n_matched = matched.len();

        let summary = self.calibrate(method, matched)?;
        Ok(PipelineOutcome {
            summary,
            n_references: refs_g.len(),
            n_matched,
            help_file: self.paths.help_file(method).to_path_buf(),
        })
    }
}

/// `x y` per line, g-frame pixel coordinates of the stars used in the fit.
fn write_positions(path: &Path, positions: &[glam::DVec2]) -> Result<()> {
    let mut out = String::with_capacity(24 * positions.len());
    for p in positions {
        let _ = writeln!(out, "{:.3} {:.3}", p.x, p.y);
    }
    std::fs::write(path, out).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}
