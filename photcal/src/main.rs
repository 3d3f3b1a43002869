use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use photcal::report::{self, ApplyOptions};
use photcal::{CalibrationConfig, CalibrationMethod, CalibrationSummary, FieldPaths, Pipeline, photometry};

#[derive(Parser, Debug)]
#[command(
    name = "photcal",
    version,
    about = "Calibrates g + r/i image pairs against SDSS photometry"
)]
struct Cli {
    /// YAML configuration file; missing keys keep their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Recompute every step even when its output exists
    #[arg(long, global = true)]
    force: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Airmass of the g and second frame when the headers lack AIRMASS
    #[arg(long, num_args = 2, value_names = ["G", "X"], global = true)]
    airmass: Option<Vec<f64>>,

    /// Confidence level of the fit bands
    #[arg(long, global = true)]
    confidence: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ImagePair {
    /// g-band image (default: <DIR>_g.fits in the current directory)
    image_g: Option<PathBuf>,
    /// r- or i-band image (default: <DIR>_i.fits)
    image_x: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the catalog, measure both frames and calibrate
    Run {
        #[command(flatten)]
        images: ImagePair,
        #[arg(short, long, value_enum, default_value_t = CalibrationMethod::ZeroPoint)]
        method: CalibrationMethod,
        /// Store the coefficients in both image headers
        #[arg(long)]
        write_headers: bool,
    },
    /// Query SDSS and write the reference star lists only
    Download {
        #[command(flatten)]
        images: ImagePair,
    },
    /// Fit one calibration method, reusing earlier products
    Calibrate {
        #[command(flatten)]
        images: ImagePair,
        #[arg(short, long, value_enum)]
        method: CalibrationMethod,
        #[arg(long)]
        write_headers: bool,
    },
    /// Print the coefficients stored in a help file or JSON summary
    Show {
        file: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Calibrate photometry tables of arbitrary sources with stored coefficients
    Apply {
        /// Help file or JSON summary with the coefficients
        #[arg(long)]
        coefficients: PathBuf,
        /// g-band photometry table (.sdssphot layout)
        phot_g: PathBuf,
        /// Second-band photometry table
        phot_x: PathBuf,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        apcor_g: f64,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        apcor_x: f64,
        /// Galactic extinction A_g
        #[arg(long, default_value_t = 0.0)]
        extinction_g: f64,
        /// Galactic extinction of the second band
        #[arg(long, default_value_t = 0.0)]
        extinction_x: f64,
        #[arg(short, long, default_value = "calibrated_mags.dat")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.quiet { "warn" } else { "info" };
    common::log_setup::setup_logging(level, "photcal");

    let config = load_config(&cli)?;

    match cli.command {
        Command::Run {
            images,
            method,
            write_headers,
        }
        | Command::Calibrate {
            images,
            method,
            write_headers,
        } => {
            let pipeline = pipeline(&images, config)?
                .with_force(cli.force)
                .with_header_update(write_headers);
            let outcome = pipeline
                .run(method)
                .with_context(|| format!("Calibration of {} failed", pipeline.paths().root))?;
            println!("{}", report::format_help(&outcome.summary));
            tracing::info!("Coefficients written to {}", outcome.help_file.display());
        }
        Command::Download { images } => {
            let pipeline = pipeline(&images, config)?.with_force(cli.force);
            let (refs, _) = pipeline.download_catalog().context("Catalog download failed")?;
            tracing::info!(
                "{} reference stars written to {}",
                refs.len(),
                pipeline.paths().references_g.display()
            );
        }
        Command::Show { file, json } => {
            let summary = read_summary(&file)?;
            if json {
                println!("{}", summary.to_json()?);
            } else {
                println!("{}", report::format_help(&summary));
            }
        }
        Command::Apply {
            coefficients,
            phot_g,
            phot_x,
            apcor_g,
            apcor_x,
            extinction_g,
            extinction_x,
            output,
        } => {
            let summary = read_summary(&coefficients)?;
            let records_g = photometry::read_table(&phot_g)
                .with_context(|| format!("Failed to read {}", phot_g.display()))?;
            let records_x = photometry::read_table(&phot_x)
                .with_context(|| format!("Failed to read {}", phot_x.display()))?;

            let options = ApplyOptions {
                aperture_correction: [apcor_g, apcor_x],
                galactic_extinction: [extinction_g, extinction_x],
            };
            let applied = report::apply_calibration(&summary, &records_g, &records_x, &options)?;
            report::write_calibrated_mags(&output, &applied.sources)?;

            let limit = |m: Option<f64>| m.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"));
            println!(
                "{} sources written to {}; 5-sigma limits g = {}, {} = {}",
                applied.sources.len(),
                output.display(),
                limit(applied.limit_g),
                summary.band,
                limit(applied.limit_x)
            );
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<CalibrationConfig> {
    let mut config = match &cli.config {
        Some(path) => CalibrationConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => CalibrationConfig::default(),
    };

    if let Some(airmass) = &cli.airmass {
        let [g, x] = airmass.as_slice() else {
            bail!("--airmass takes two values");
        };
        config.airmass_fallback = Some([*g, *x]);
    }
    if let Some(confidence) = cli.confidence {
        config.fit.confidence = confidence;
    }
    config.validate()?;
    Ok(config)
}

fn pipeline(images: &ImagePair, config: CalibrationConfig) -> Result<Pipeline> {
    let paths = match (&images.image_g, &images.image_x) {
        (Some(g), Some(x)) => FieldPaths::new(g, x),
        (None, None) => {
            let cwd = std::env::current_dir().context("Cannot determine the current directory")?;
            FieldPaths::from_directory(&cwd)
                .with_context(|| format!("Cannot derive a field name from {}", cwd.display()))?
        }
        _ => bail!("Give both images or neither"),
    };
    for image in [&paths.image_g, &paths.image_x] {
        if !image.exists() {
            bail!("Image {} not found", image.display());
        }
    }
    Ok(Pipeline::new(&paths.image_g, &paths.image_x, config))
}

fn read_summary(path: &Path) -> Result<CalibrationSummary> {
    let summary = if path.extension().is_some_and(|e| e == "json") {
        CalibrationSummary::read_json(path)?
    } else {
        report::read_help_file(path).with_context(|| format!("Failed to read {}", path.display()))?
    };
    Ok(summary)
}
