//! One end-to-end run: check tools, pair, process, report.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use data_contracts::{
    PipelineResult, RunCounts, RunReport, RunReportSchemaVersion, SkippedFile, UnpairedImage,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::batch::process_pairs;
use crate::pairing::{pair_directories, MatchOptions, PairingError};
use crate::pipeline::PipelineRunner;
use crate::services::{CancellationToken, CommandRunner};
use crate::stage_commands::common::PipelineOptions;
use crate::ToolConfig;

pub const REPORT_FILE_NAME: &str = "spatial_report.json";

/// Exit status for a completed run with nothing failed or unpaired.
pub const EXIT_OK: i32 = 0;
/// Exit status when a pair failed or an image could not be paired.
pub const EXIT_INCOMPLETE: i32 = 1;
/// Exit status for invalid invocations and startup errors.
pub const EXIT_USAGE: i32 = 2;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{side} directory {path} does not exist or is not a directory")]
    BadDirectory { side: &'static str, path: PathBuf },
    #[error("required tool `{tool}` not found (configured as {program})")]
    MissingTool { tool: &'static str, program: PathBuf },
    #[error("invalid spatial parameters: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Pairing(#[from] PairingError),
    #[error("creating output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing run report {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("starting worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl SessionError {
    pub fn exit_code(&self) -> i32 {
        EXIT_USAGE
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub left_dir: PathBuf,
    pub right_dir: PathBuf,
    pub output_dir: PathBuf,
    pub matching: MatchOptions,
    pub pipeline: PipelineOptions,
    pub jobs: usize,
    /// Pair and report only; no external tool is launched.
    pub dry_run: bool,
    /// Treat unpaired images as informational rather than a failed run.
    pub allow_unpaired: bool,
    pub write_report: bool,
}

/// Aggregated outcome of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub results: Vec<PipelineResult>,
    pub unpaired: Vec<UnpairedImage>,
    pub skipped: Vec<SkippedFile>,
    pub pairs: usize,
    pub index_offset: i64,
    pub dry_run: bool,
    pub allow_unpaired: bool,
    pub report_path: Option<PathBuf>,
}

impl RunSummary {
    pub fn counts(&self) -> RunCounts {
        RunReport::counts_from(self.pairs, &self.results, &self.unpaired, &self.skipped)
    }

    /// 0 when every pair succeeded and nothing was left unpaired (unless
    /// unpaired images are allowed), 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        let counts = self.counts();
        if counts.failed > 0 || (counts.unpaired > 0 && !self.allow_unpaired) {
            EXIT_INCOMPLETE
        } else {
            EXIT_OK
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run summary")?;
        for res in &self.results {
            match (&res.output, res.failed_stage) {
                (Some(out), _) => writeln!(
                    f,
                    "  [{:>3}] #{:<6} ok      {}",
                    res.pair_index,
                    res.left_index,
                    out.display()
                )?,
                (None, stage) => writeln!(
                    f,
                    "  [{:>3}] #{:<6} FAILED  stage={} exit={} {}",
                    res.pair_index,
                    res.left_index,
                    stage.map(|s| s.as_str()).unwrap_or("-"),
                    res.exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    res.detail.as_deref().unwrap_or("")
                )?,
            }
        }
        for u in &self.unpaired {
            writeln!(
                f,
                "  unpaired {:<5} #{:<6} {} ({:?})",
                u.image.side.as_str(),
                u.image.index,
                u.image.path.display(),
                u.reason
            )?;
        }
        for s in &self.skipped {
            writeln!(f, "  skipped  {:<5} {} ({})", s.side.as_str(), s.path.display(), s.reason)?;
        }
        let c = self.counts();
        if self.dry_run {
            write!(
                f,
                "Dry run: {} pairs, {} unpaired, {} skipped (index offset {})",
                c.pairs, c.unpaired, c.skipped, self.index_offset
            )
        } else {
            write!(
                f,
                "Pairs: {}  succeeded: {}  failed: {}  unpaired: {}  skipped: {}",
                c.pairs, c.succeeded, c.failed, c.unpaired, c.skipped
            )
        }
    }
}

/// Tools the given options will launch, with their configured programs.
pub fn required_tools<'a>(
    config: &'a ToolConfig,
    options: &PipelineOptions,
) -> Vec<(&'static str, &'a Path)> {
    let mut tools = Vec::new();
    if options.bake_orientation {
        tools.push(("jpegtran", config.jpegtran_bin.as_path()));
    }
    if options.needs_correction_pass() {
        tools.push(("ffmpeg", config.ffmpeg_bin.as_path()));
    }
    tools.push(("exiftool", config.exiftool_bin.as_path()));
    tools.push(("stereo_align", config.align_bin.as_path()));
    if options.package {
        tools.push(("spatial_photo", config.spatial_bin.as_path()));
    }
    tools
}

/// Fail fast if any tool the run needs cannot be resolved.
pub fn check_tools(
    config: &ToolConfig,
    options: &PipelineOptions,
    runner: &dyn CommandRunner,
) -> Result<(), SessionError> {
    for (tool, program) in required_tools(config, options) {
        match runner.locate(program) {
            Some(found) => info!(tool, path = %found.display(), "found tool"),
            None => {
                return Err(SessionError::MissingTool {
                    tool,
                    program: program.to_path_buf(),
                })
            }
        }
    }
    Ok(())
}

pub fn run_session(
    config: &ToolConfig,
    options: &SessionOptions,
    runner: &dyn CommandRunner,
    cancel: CancellationToken,
) -> Result<RunSummary, SessionError> {
    let started_at_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    for (side, dir) in [("left", &options.left_dir), ("right", &options.right_dir)] {
        if !dir.is_dir() {
            return Err(SessionError::BadDirectory {
                side,
                path: dir.clone(),
            });
        }
    }
    options
        .pipeline
        .spatial
        .validate()
        .map_err(SessionError::InvalidParams)?;
    if !options.dry_run {
        check_tools(config, &options.pipeline, runner)?;
    }

    let outcome = pair_directories(&options.left_dir, &options.right_dir, &options.matching)?;

    fs::create_dir_all(&options.output_dir).map_err(|source| SessionError::OutputDir {
        path: options.output_dir.clone(),
        source,
    })?;

    let results = if options.dry_run {
        for pair in &outcome.pairs {
            info!(
                pair = pair.pair_index,
                left = %pair.left.path.display(),
                right = %pair.right.path.display(),
                "would process"
            );
        }
        Vec::new()
    } else {
        let pipeline = PipelineRunner::new(
            config,
            &options.pipeline,
            runner,
            &options.output_dir,
            cancel.clone(),
        );
        process_pairs(&pipeline, &outcome.pairs, options.jobs)?
    };

    if cancel.is_cancelled() {
        warn!("run was interrupted; unfinished pairs are reported as failed");
    }
    if !options.dry_run && !config.keep_work {
        // Per-pair work dirs are already gone; drop the empty parent.
        let _ = fs::remove_dir(options.output_dir.join(&config.work_dir_name));
    }

    let mut summary = RunSummary {
        results,
        unpaired: outcome.unpaired,
        skipped: outcome.skipped,
        pairs: outcome.pairs.len(),
        index_offset: outcome.index_offset,
        dry_run: options.dry_run,
        allow_unpaired: options.allow_unpaired,
        report_path: None,
    };

    if options.write_report {
        let path = options.output_dir.join(REPORT_FILE_NAME);
        let report = RunReport {
            schema_version: RunReportSchemaVersion::V1,
            started_at_unix,
            left_dir: options.left_dir.clone(),
            right_dir: options.right_dir.clone(),
            output_dir: options.output_dir.clone(),
            index_offset: summary.index_offset,
            dry_run: summary.dry_run,
            counts: summary.counts(),
            results: summary.results.clone(),
            unpaired: summary.unpaired.clone(),
            skipped: summary.skipped.clone(),
        };
        write_report(&path, &report)?;
        summary.report_path = Some(path);
    }

    Ok(summary)
}

fn write_report(path: &Path, report: &RunReport) -> Result<(), SessionError> {
    let json = serde_json::to_vec_pretty(report)
        .map_err(|err| SessionError::Report {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidData, err),
        })?;
    fs::write(path, json).map_err(|source| SessionError::Report {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "wrote run report");
    Ok(())
}
