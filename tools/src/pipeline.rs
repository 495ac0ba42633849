//! Per-pair stage sequencing.
//!
//! Each pair walks `Pending -> Orienting -> Correcting -> Aligning ->
//! Tagging -> Dating -> Packaging -> Placing -> Done`, skipping disabled
//! stages. The first failing stage ends the pair and is reported in its
//! `PipelineResult`; other pairs are unaffected.

use std::fs;
use std::path::{Path, PathBuf};

use data_contracts::{CameraSide, CapturedImage, ImagePair, PipelineResult, Stage};
use tracing::{debug, error, info, warn};

use crate::services::{CancellationToken, CommandOutput, CommandRunner, ServiceCommand, ServiceError};
use crate::stage_commands::builder;
use crate::stage_commands::common::{
    capture_datetime, orientation_transform, parse_orientation, PipelineOptions,
};
use crate::ToolConfig;

/// Where a pair currently is in its stage sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    Pending,
    Orienting,
    Correcting,
    Aligning,
    Tagging,
    Dating,
    Packaging,
    /// Moving the finished file into the output directory. From here on a
    /// file at the output path belongs to this run.
    Placing,
    Done,
}

/// Why a stage stopped the pair.
#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    exit_code: Option<i32>,
    detail: String,
}

impl StageFailure {
    fn new(stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            exit_code: None,
            detail: detail.into(),
        }
    }
}

/// Drives the external tools for one pair at a time.
pub struct PipelineRunner<'a> {
    config: &'a ToolConfig,
    options: &'a PipelineOptions,
    runner: &'a dyn CommandRunner,
    output_dir: &'a Path,
    cancel: CancellationToken,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(
        config: &'a ToolConfig,
        options: &'a PipelineOptions,
        runner: &'a dyn CommandRunner,
        output_dir: &'a Path,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            options,
            runner,
            output_dir,
            cancel,
        }
    }

    /// Final location of a pair's spatial photo.
    pub fn output_path(&self, pair: &ImagePair) -> PathBuf {
        let stem = pair.left.stem();
        if self.options.package {
            self.output_dir
                .join(format!("{stem}.{}", self.config.spatial_extension))
        } else {
            self.output_dir.join(format!("{stem}-sbs.tiff"))
        }
    }

    pub fn work_dir(&self, pair: &ImagePair) -> PathBuf {
        self.output_dir
            .join(&self.config.work_dir_name)
            .join(pair.left.stem())
    }

    /// Run every enabled stage for `pair`. Never panics on tool failure;
    /// the outcome is always a `PipelineResult`.
    pub fn process(&self, pair: &ImagePair) -> PipelineResult {
        let output = self.output_path(pair);
        let work = self.work_dir(pair);
        info!(
            pair = pair.pair_index,
            left = %pair.left.file_name(),
            right = %pair.right.file_name(),
            "processing pair"
        );

        let mut state = PairState::Pending;
        let outcome = self.run_stages(pair, &work, &output, &mut state);
        let placed_output = matches!(state, PairState::Placing | PairState::Done);

        if !self.config.keep_work {
            if let Err(err) = fs::remove_dir_all(&work) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %work.display(), "could not remove work directory: {err}");
                }
            }
        }

        match outcome {
            Ok(()) => {
                info!(pair = pair.pair_index, output = %output.display(), "pair done");
                PipelineResult::success(pair.pair_index, pair.left.index, output)
            }
            Err(failure) => {
                // Only a file this run started placing is partial; anything
                // else at the output path is a previous run's result.
                if placed_output {
                    if let Err(err) = fs::remove_file(&output) {
                        if err.kind() != std::io::ErrorKind::NotFound {
                            warn!(path = %output.display(), "could not remove partial output: {err}");
                        }
                    }
                }
                error!(
                    pair = pair.pair_index,
                    stage = %failure.stage,
                    exit_code = ?failure.exit_code,
                    "pair failed: {}",
                    failure.detail
                );
                PipelineResult::failed(
                    pair.pair_index,
                    pair.left.index,
                    failure.stage,
                    failure.exit_code,
                    failure.detail,
                )
            }
        }
    }

    fn run_stages(
        &self,
        pair: &ImagePair,
        work: &Path,
        output: &Path,
        state: &mut PairState,
    ) -> Result<(), StageFailure> {
        self.check_cancelled(Stage::Prepare)?;
        fs::create_dir_all(work).map_err(|err| {
            StageFailure::new(
                Stage::Prepare,
                format!("creating work directory {}: {err}", work.display()),
            )
        })?;

        let mut left = pair.left.path.clone();
        let mut right = pair.right.path.clone();

        if self.options.bake_orientation {
            self.advance(state, PairState::Orienting);
            left = self.bake_orientation(&pair.left, work)?;
            right = self.bake_orientation(&pair.right, work)?;
        }

        if let Some(filter) = builder::correction_filter(self.config, self.options) {
            self.advance(state, PairState::Correcting);
            left = self.correct(&filter, CameraSide::Left, &left, work)?;
            right = self.correct(&filter, CameraSide::Right, &right, work)?;
        }

        self.advance(state, PairState::Aligning);
        let stem = pair.left.stem();
        let sbs = work.join(format!("{stem}-sbs.tiff"));
        clear_target(Stage::Alignment, &sbs)?;
        self.run_stage(
            Stage::Alignment,
            &builder::align_command(self.config, &left, &right, &sbs),
        )?;
        self.expect_file(Stage::Alignment, &sbs)?;

        self.advance(state, PairState::Tagging);
        self.run_stage(
            Stage::Metadata,
            &builder::tag_command(self.config, &pair.left.path, &sbs),
        )?;

        if self.options.date_from_filename {
            self.advance(state, PairState::Dating);
            let datetime = capture_datetime(&pair.left.file_name())
                .map_err(|detail| StageFailure::new(Stage::CaptureDate, detail))?;
            self.run_stage(
                Stage::CaptureDate,
                &builder::date_command(self.config, &datetime, &sbs),
            )?;
        }

        let produced = if self.options.package {
            self.advance(state, PairState::Packaging);
            let packaged = sbs.with_extension(&self.config.spatial_extension);
            clear_target(Stage::Packaging, &packaged)?;
            self.run_stage(
                Stage::Packaging,
                &builder::package_command(self.config, &self.options.spatial, &sbs),
            )?;
            self.expect_file(Stage::Packaging, &packaged)?;
            packaged
        } else {
            sbs
        };

        self.check_cancelled(Stage::Prepare)?;
        self.advance(state, PairState::Placing);
        move_file(&produced, output).map_err(|err| {
            StageFailure::new(
                Stage::Prepare,
                format!(
                    "moving {} to {}: {err}",
                    produced.display(),
                    output.display()
                ),
            )
        })?;
        self.advance(state, PairState::Done);
        Ok(())
    }

    fn advance(&self, state: &mut PairState, next: PairState) {
        debug!(from = ?state, to = ?next, "pair state");
        *state = next;
    }

    /// Returns the path the later stages should read for this side.
    fn bake_orientation(&self, image: &CapturedImage, work: &Path) -> Result<PathBuf, StageFailure> {
        let out = self.run_stage(
            Stage::Orientation,
            &builder::orientation_query_command(self.config, &image.path),
        )?;
        let orientation = parse_orientation(&out.stdout)
            .map_err(|detail| StageFailure::new(Stage::Orientation, detail))?;
        let Some(transform) = orientation_transform(orientation) else {
            return Ok(image.path.clone());
        };

        debug!(path = %image.path.display(), orientation, "baking orientation");
        let rotated = work.join(format!("{}-oriented.jpg", image.side));
        clear_target(Stage::Orientation, &rotated)?;
        self.run_stage(
            Stage::Orientation,
            &builder::rotate_command(self.config, transform, &image.path, &rotated),
        )?;
        self.run_stage(
            Stage::Orientation,
            &builder::reset_orientation_command(self.config, &rotated),
        )?;
        Ok(rotated)
    }

    fn correct(
        &self,
        filter: &str,
        side: CameraSide,
        input: &Path,
        work: &Path,
    ) -> Result<PathBuf, StageFailure> {
        let corrected = work.join(format!("{side}-corrected.jpg"));
        clear_target(Stage::LensCorrection, &corrected)?;
        self.run_stage(
            Stage::LensCorrection,
            &builder::correction_command(self.config, filter, input, &corrected),
        )?;
        self.expect_file(Stage::LensCorrection, &corrected)?;
        Ok(corrected)
    }

    fn check_cancelled(&self, stage: Stage) -> Result<(), StageFailure> {
        if self.cancel.is_cancelled() {
            return Err(StageFailure::new(stage, "cancelled"));
        }
        Ok(())
    }

    fn run_stage(&self, stage: Stage, cmd: &ServiceCommand) -> Result<CommandOutput, StageFailure> {
        self.check_cancelled(stage)?;
        debug!(%stage, command = %cmd, "running");
        let out = match self.runner.run(cmd, &self.cancel) {
            Ok(out) => out,
            Err(ServiceError::Cancelled) => return Err(StageFailure::new(stage, "cancelled")),
            Err(err) => return Err(StageFailure::new(stage, err.to_string())),
        };
        if out.success() {
            if !out.stdout.trim().is_empty() {
                debug!(%stage, "{} output: {}", cmd.program_name(), out.stdout.trim());
            }
            return Ok(out);
        }

        let program = cmd.program_name();
        // An interrupt from the terminal reaches the child too.
        if self.cancel.is_cancelled() {
            return Err(StageFailure::new(stage, "cancelled"));
        }
        if !out.stdout.trim().is_empty() {
            warn!(%stage, "{program} stdout: {}", out.stdout.trim());
        }
        if !out.stderr.trim().is_empty() {
            warn!(%stage, "{program} stderr: {}", out.stderr.trim());
        }
        let detail = match out.code {
            Some(code) => format!("{program} exited with status {code}"),
            None => format!("{program} was terminated by a signal"),
        };
        Err(StageFailure {
            stage,
            exit_code: out.code,
            detail,
        })
    }

    fn expect_file(&self, stage: Stage, path: &Path) -> Result<(), StageFailure> {
        if path.is_file() {
            Ok(())
        } else {
            Err(StageFailure::new(
                stage,
                format!("expected output {} was not produced", path.display()),
            ))
        }
    }
}

/// Remove a stale copy of a stage's output so only a fresh one passes
/// `expect_file`.
fn clear_target(stage: Stage, path: &Path) -> Result<(), StageFailure> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StageFailure::new(
            stage,
            format!("removing stale {}: {err}", path.display()),
        )),
    }
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}
