use clap::Args;
use data_contracts::spatial::{FieldOfView, SpatialParams};
use std::path::PathBuf;

/// Left/right capture directories shared by pairing binaries.
#[derive(Debug, Clone, Args)]
pub struct StereoInputArgs {
    /// Directory holding the left camera's images.
    #[arg(long, short = 'l', default_value = "left")]
    pub left: PathBuf,
    /// Directory holding the right camera's images.
    #[arg(long, short = 'r', default_value = "right")]
    pub right: PathBuf,
}

/// Destination for spatial photos and the run report.
#[derive(Debug, Clone, Args)]
pub struct SpatialOutputArgs {
    /// Output directory (created if missing).
    #[arg(long, short = 'o', default_value = "spatial")]
    pub out: PathBuf,
}

/// Viewing geometry overrides; unset values fall back to defaults.
#[derive(Debug, Clone, Default, Args)]
pub struct SpatialGeometryArgs {
    /// Baseline between the lenses in millimetres.
    #[arg(long, short = 'b')]
    pub baseline: Option<f64>,
    /// Horizontal field of view in degrees.
    #[arg(long, conflicts_with_all = ["sensor_width", "focal_length"])]
    pub hfov: Option<f64>,
    /// Sensor width in millimetres (switches to sensor/focal geometry).
    #[arg(long, short = 's')]
    pub sensor_width: Option<f64>,
    /// Focal length in millimetres (switches to sensor/focal geometry).
    #[arg(long, short = 'f')]
    pub focal_length: Option<f64>,
}

/// Which field-of-view description the packager gets when the command line
/// does not pick one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FovMode {
    #[default]
    Horizontal,
    Lens,
}

/// Fallback geometry used when the command line leaves a value unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryDefaults {
    pub mode: FovMode,
    pub baseline_mm: f64,
    pub hfov_degrees: f64,
    pub sensor_width_mm: f64,
    pub focal_length_mm: f64,
}

impl SpatialGeometryArgs {
    /// Resolve to packager parameters. Sensor width or focal length on the
    /// command line selects lens geometry, `--hfov` selects a horizontal FOV,
    /// and with neither the configured mode applies.
    pub fn resolve(&self, defaults: &GeometryDefaults) -> SpatialParams {
        let lens = if self.sensor_width.is_some() || self.focal_length.is_some() {
            true
        } else if self.hfov.is_some() {
            false
        } else {
            defaults.mode == FovMode::Lens
        };
        let fov = if lens {
            FieldOfView::Lens {
                sensor_width_mm: self.sensor_width.unwrap_or(defaults.sensor_width_mm),
                focal_length_mm: self.focal_length.unwrap_or(defaults.focal_length_mm),
            }
        } else {
            FieldOfView::Horizontal {
                degrees: self.hfov.unwrap_or(defaults.hfov_degrees),
            }
        };
        SpatialParams {
            baseline_mm: self.baseline.unwrap_or(defaults.baseline_mm),
            fov,
        }
    }
}
