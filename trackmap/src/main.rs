use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use trackmap::config::{PipelineConfig, ScaleReference};
use trackmap::export_centerline::{export_curvature_csv, export_obj, load_centerline_json, save_centerline_json};
use trackmap::export_telemetry::{export_canonical, export_mapped};
use trackmap::mapping::LapMapper;
use trackmap::overlay::save_overlay;
use trackmap::telemetry::{normalize, RawTable};
use trackmap::track::{extract_centerline, load_track_map};

/// Extract track centerlines from map images and align lap telemetry to them
#[derive(Parser, Debug)]
#[command(name = "trackmap")]
#[command(about = "Track map centerline extraction and telemetry mapping", long_about = None)]
struct Cli {
    /// Pipeline configuration (JSON); command-line flags override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract the centerline from a track map image
    Extract(ExtractArgs),
    /// Resample lap telemetry onto a centerline's distance grid
    Map(MapArgs),
    /// Convert telemetry to the canonical wide layout
    Normalize(NormalizeArgs),
    /// Write per-point curvature of a centerline
    Curvature(CurvatureArgs),
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Track map image
    #[arg(short, long)]
    input: PathBuf,

    /// Directory for centerline.json, track.obj and debug output
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Length in meters spanned by the longer side of the track's bounding box
    #[arg(long, conflicts_with = "meters_per_pixel")]
    track_length: Option<f64>,

    /// Explicit map scale
    #[arg(long)]
    meters_per_pixel: Option<f64>,

    /// Number of centerline points
    #[arg(long)]
    samples: Option<usize>,

    /// Save a debug overlay of the extracted centerline
    #[arg(short, long)]
    debug: bool,
}

#[derive(Args, Debug)]
struct MapArgs {
    /// Telemetry CSV (long or wide layout)
    #[arg(short, long)]
    telemetry: PathBuf,

    /// Centerline JSON written by `extract`
    #[arg(short, long)]
    centerline: PathBuf,

    /// Mapped telemetry CSV
    #[arg(short, long)]
    output: PathBuf,

    /// Minimum rows for a lap to be mapped
    #[arg(long)]
    min_samples: Option<usize>,

    /// Append the centerline curvature column
    #[arg(long)]
    with_curvature: bool,

    /// Map laps on a single thread
    #[arg(long)]
    sequential: bool,
}

#[derive(Args, Debug)]
struct NormalizeArgs {
    #[arg(short, long)]
    telemetry: PathBuf,

    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct CurvatureArgs {
    #[arg(short, long)]
    centerline: PathBuf,

    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "trackmap=debug" } else { "trackmap=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            PipelineConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    match cli.command {
        Command::Extract(args) => handle_extract(args, config),
        Command::Map(args) => handle_map(args, config),
        Command::Normalize(args) => handle_normalize(args, config),
        Command::Curvature(args) => handle_curvature(args),
    }
}

fn handle_extract(args: ExtractArgs, mut config: PipelineConfig) -> Result<()> {
    let extraction = &mut config.extraction;
    if let Some(meters) = args.track_length {
        extraction.scale = ScaleReference::LongestSide { meters };
    }
    if let Some(scale) = args.meters_per_pixel {
        extraction.scale = ScaleReference::MetersPerPixel(scale);
    }
    if let Some(samples) = args.samples {
        extraction.sample_count = samples;
    }

    let image = load_track_map(&args.input)
        .with_context(|| format!("Failed to load track map {}", args.input.display()))?;
    let result = extract_centerline(&image, &config.extraction)
        .with_context(|| format!("Failed to extract centerline from {}", args.input.display()))?;

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;

    let json_path = args.output_dir.join("centerline.json");
    save_centerline_json(&result.centerline, &json_path)?;
    export_obj(&result.centerline, &args.output_dir.join("track.obj"))?;

    if args.debug {
        save_overlay(
            &image,
            &result.smoothed,
            &result.centerline.corners,
            &args.output_dir.join("debug_overlay.png"),
        )?;
    }

    println!(
        "Centerline: {} points, {:.1} m, {} corner(s) -> {}",
        result.centerline.len(),
        result.centerline.length,
        result.centerline.corners.len(),
        json_path.display()
    );
    Ok(())
}

fn handle_map(args: MapArgs, mut config: PipelineConfig) -> Result<()> {
    if let Some(min_samples) = args.min_samples {
        config.mapping.min_samples = min_samples;
    }
    if args.with_curvature {
        config.mapping.append_curvature = true;
    }
    if args.sequential {
        config.mapping.parallel = false;
    }

    let frame = read_telemetry(&args.telemetry, &config)?;
    let centerline = load_centerline_json(&args.centerline)
        .with_context(|| format!("Failed to load centerline {}", args.centerline.display()))?;

    let mapped = LapMapper::new(&frame, &centerline, &config.mapping).map_all()?;
    export_mapped(&mapped, &args.output)?;

    println!(
        "Mapped {} lap(s) onto {} points -> {}",
        mapped.profiles.len(),
        centerline.len(),
        args.output.display()
    );
    Ok(())
}

fn handle_normalize(args: NormalizeArgs, config: PipelineConfig) -> Result<()> {
    let frame = read_telemetry(&args.telemetry, &config)?;
    export_canonical(&frame, &args.output)?;

    println!(
        "Normalized {} rows ({} signals) -> {}",
        frame.rows.len(),
        frame.signals.len(),
        args.output.display()
    );
    Ok(())
}

fn handle_curvature(args: CurvatureArgs) -> Result<()> {
    let centerline = load_centerline_json(&args.centerline)
        .with_context(|| format!("Failed to load centerline {}", args.centerline.display()))?;
    export_curvature_csv(&centerline, &args.output)?;

    println!("Curvature for {} points -> {}", centerline.len(), args.output.display());
    Ok(())
}

fn read_telemetry(path: &Path, config: &PipelineConfig) -> Result<trackmap::TelemetryFrame> {
    let table = RawTable::from_path(path, &config.telemetry)
        .with_context(|| format!("Failed to read telemetry {}", path.display()))?;
    let frame = normalize(&table, &config.telemetry)
        .with_context(|| format!("Failed to normalize telemetry {}", path.display()))?;
    Ok(frame)
}
