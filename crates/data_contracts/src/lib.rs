//! Shared data contracts for stereo captures, pairs, pipeline results, and run reports.

pub mod capture;
pub mod manifest;
pub mod result;
pub mod spatial;

pub use capture::{
    parse_capture_name, CameraSide, CaptureName, CaptureNameError, CapturedImage, ImagePair,
    PairError, SkippedFile, UnpairedImage, UnpairedReason,
};
pub use manifest::{RunCounts, RunReport, RunReportSchemaVersion};
pub use result::{PipelineResult, PipelineStatus, Stage};
pub use spatial::{FieldOfView, SpatialParams};
