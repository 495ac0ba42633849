//! Pair left/right stereo captures and turn each pair into a spatial photo.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use cli_support::common::{SpatialGeometryArgs, SpatialOutputArgs, StereoInputArgs};
use spatialpair_tools::pairing::MatchOptions;
use spatialpair_tools::services::{CancellationToken, ProcessRunner};
use spatialpair_tools::session::{run_session, SessionOptions, EXIT_USAGE};
use spatialpair_tools::stage_commands::common::PipelineOptions;
use spatialpair_tools::ToolConfig;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Pair stereo captures from two cameras and package them as spatial photos"
)]
struct Cli {
    #[command(flatten)]
    input: StereoInputArgs,

    #[command(flatten)]
    output: SpatialOutputArgs,

    #[command(flatten)]
    geometry: SpatialGeometryArgs,

    /// Config file (defaults to $SPATIALPAIR_CONFIG, then ./spatialpair.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Centre-crop both images to the configured aspect ratio.
    #[arg(long)]
    crop: bool,

    /// Skip lens correction (rectilinear lenses).
    #[arg(long)]
    no_lens_correction: bool,

    /// Bake EXIF orientation into the pixels before aligning.
    #[arg(long)]
    bake_orientation: bool,

    /// Write DateTimeOriginal/CreateDate/ModifyDate from IMG<YYYYMMDD>-<HHMMSS> names.
    #[arg(long)]
    date_from_filename: bool,

    /// Stop after alignment and keep the side-by-side tiff as output.
    #[arg(long)]
    skip_spatial: bool,

    /// Right index = left index + offset; estimated when omitted.
    #[arg(long, allow_hyphen_values = true)]
    index_offset: Option<i64>,

    /// Pairs processed concurrently (overrides run.jobs).
    #[arg(long, short = 'j')]
    jobs: Option<usize>,

    /// Images without a partner do not fail the run.
    #[arg(long)]
    allow_unpaired: bool,

    /// Pair and report without launching any tool.
    #[arg(long)]
    dry_run: bool,

    /// Keep per-pair intermediate files.
    #[arg(long)]
    keep_work: bool,

    /// Skip writing spatial_report.json.
    #[arg(long)]
    no_report: bool,

    /// Debug logging (RUST_LOG takes precedence).
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn session_options(cli: &Cli, config: &ToolConfig) -> anyhow::Result<SessionOptions> {
    let spatial = cli.geometry.resolve(&config.geometry);
    spatial
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid spatial geometry")?;
    let pipeline = PipelineOptions::default()
        .with_bake_orientation(cli.bake_orientation)
        .with_lens_correction(!cli.no_lens_correction)
        .with_crop(cli.crop)
        .with_date_from_filename(cli.date_from_filename)
        .with_package(!cli.skip_spatial)
        .with_spatial(spatial);
    let jobs = cli.jobs.unwrap_or(config.jobs);
    if jobs == 0 {
        anyhow::bail!("--jobs must be at least 1");
    }
    Ok(SessionOptions {
        left_dir: cli.input.left.clone(),
        right_dir: cli.input.right.clone(),
        output_dir: cli.output.out.clone(),
        matching: MatchOptions {
            index_offset: cli.index_offset,
            max_timestamp_skew: config.max_timestamp_skew,
        },
        pipeline,
        jobs,
        dry_run: cli.dry_run,
        allow_unpaired: cli.allow_unpaired,
        write_report: !cli.no_report,
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match ToolConfig::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("{err}");
            return ExitCode::from(EXIT_USAGE as u8);
        }
    };
    if cli.keep_work {
        config.keep_work = true;
    }

    let options = match session_options(&cli, &config) {
        Ok(opts) => opts,
        Err(err) => {
            error!("{err:#}");
            return ExitCode::from(EXIT_USAGE as u8);
        }
    };

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            std::process::exit(130);
        }
        handler_token.cancel();
    }) {
        warn!("could not install interrupt handler: {err}");
    }

    let runner = ProcessRunner::default();
    match run_session(&config, &options, &runner, cancel) {
        Ok(summary) => {
            println!("{summary}");
            if let Some(path) = &summary.report_path {
                println!("Report: {}", path.display());
            }
            ExitCode::from(summary.exit_code() as u8)
        }
        Err(err) => {
            error!("{err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
