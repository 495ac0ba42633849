use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::capture::{SkippedFile, UnpairedImage};
use crate::result::PipelineResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunReportSchemaVersion {
    V1,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCounts {
    pub pairs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unpaired: usize,
    pub skipped: usize,
}

/// Everything a run did, written next to the spatial photos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: RunReportSchemaVersion,
    pub started_at_unix: f64,
    pub left_dir: PathBuf,
    pub right_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Offset added to left indices to find the matching right index.
    pub index_offset: i64,
    pub dry_run: bool,
    pub counts: RunCounts,
    pub results: Vec<PipelineResult>,
    pub unpaired: Vec<UnpairedImage>,
    pub skipped: Vec<SkippedFile>,
}

impl RunReport {
    pub fn counts_from(
        pairs: usize,
        results: &[PipelineResult],
        unpaired: &[UnpairedImage],
        skipped: &[SkippedFile],
    ) -> RunCounts {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        RunCounts {
            pairs,
            succeeded,
            failed: results.len() - succeeded,
            unpaired: unpaired.len(),
            skipped: skipped.len(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.started_at_unix.is_nan() || self.started_at_unix < 0.0 {
            return Err("started_at_unix must be non-negative".into());
        }
        if self.counts.succeeded + self.counts.failed != self.results.len() {
            return Err("succeeded + failed must equal the number of results".into());
        }
        if !self.dry_run && self.results.len() != self.counts.pairs {
            return Err("every pair needs exactly one result".into());
        }
        Ok(())
    }
}
