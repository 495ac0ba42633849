use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Processing stages of a single pair, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Work directory setup and final output placement.
    Prepare,
    Orientation,
    LensCorrection,
    Alignment,
    Metadata,
    /// Capture date written from the filename.
    CaptureDate,
    Packaging,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Orientation => "orientation",
            Stage::LensCorrection => "lens_correction",
            Stage::Alignment => "alignment",
            Stage::Metadata => "metadata",
            Stage::CaptureDate => "capture_date",
            Stage::Packaging => "packaging",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineResult {
    pub pair_index: usize,
    /// Canonical (left camera) index of the pair.
    pub left_index: u32,
    pub output: Option<PathBuf>,
    pub status: PipelineStatus,
    pub failed_stage: Option<Stage>,
    pub exit_code: Option<i32>,
    pub detail: Option<String>,
}

impl PipelineResult {
    pub fn success(pair_index: usize, left_index: u32, output: PathBuf) -> Self {
        Self {
            pair_index,
            left_index,
            output: Some(output),
            status: PipelineStatus::Success,
            failed_stage: None,
            exit_code: None,
            detail: None,
        }
    }

    pub fn failed(
        pair_index: usize,
        left_index: u32,
        stage: Stage,
        exit_code: Option<i32>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            pair_index,
            left_index,
            output: None,
            status: PipelineStatus::Failed,
            failed_stage: Some(stage),
            exit_code,
            detail: Some(detail.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Success
    }
}
