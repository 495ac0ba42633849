use std::path::Path;

use data_contracts::spatial::{FieldOfView, SpatialParams};

use super::common::PipelineOptions;
use crate::services::ServiceCommand;
use crate::ToolConfig;

/// ffmpeg filter chain for the correction pass, or `None` when neither lens
/// correction nor cropping is enabled.
pub fn correction_filter(cfg: &ToolConfig, opts: &PipelineOptions) -> Option<String> {
    let mut filters = Vec::new();
    if opts.lens_correction {
        filters.push(format!("lenscorrection={}", cfg.lens_params));
    }
    if opts.crop {
        let (w, h) = cfg.crop_aspect;
        // Largest centred window with the target aspect; even sizes keep encoders happy.
        filters.push(format!(
            "crop=trunc(min(iw\\,ih*{w}/{h})/2)*2:trunc(min(ih\\,iw*{h}/{w})/2)*2"
        ));
    }
    (!filters.is_empty()).then(|| filters.join(","))
}

pub fn correction_command(cfg: &ToolConfig, filter: &str, input: &Path, output: &Path) -> ServiceCommand {
    ServiceCommand::new(&cfg.ffmpeg_bin)
        .arg("-i")
        .path_arg(input)
        .arg("-vf")
        .arg(filter)
        .arg("-q:v")
        .arg(cfg.jpeg_quality.to_string())
        .arg("-y")
        .path_arg(output)
}

pub fn orientation_query_command(cfg: &ToolConfig, image: &Path) -> ServiceCommand {
    ServiceCommand::new(&cfg.exiftool_bin)
        .args(["-Orientation#", "-s", "-s", "-s"])
        .path_arg(image)
}

pub fn rotate_command(
    cfg: &ToolConfig,
    transform: &[&str],
    input: &Path,
    output: &Path,
) -> ServiceCommand {
    ServiceCommand::new(&cfg.jpegtran_bin)
        .args(["-copy", "all"])
        .args(transform.iter().copied())
        .arg("-outfile")
        .path_arg(output)
        .path_arg(input)
}

/// Mark a rotated copy as upright so viewers do not rotate it twice.
pub fn reset_orientation_command(cfg: &ToolConfig, image: &Path) -> ServiceCommand {
    ServiceCommand::new(&cfg.exiftool_bin)
        .args(["-Orientation=1", "-n", "-overwrite_original"])
        .path_arg(image)
}

pub fn align_command(cfg: &ToolConfig, left: &Path, right: &Path, output: &Path) -> ServiceCommand {
    ServiceCommand::new(&cfg.align_bin)
        .path_arg(left)
        .path_arg(right)
        .arg(cfg.align_tolerance.to_string())
        .path_arg(output)
}

/// Copy every tag from the left source onto the aligned output.
pub fn tag_command(cfg: &ToolConfig, source: &Path, target: &Path) -> ServiceCommand {
    ServiceCommand::new(&cfg.exiftool_bin)
        .arg("-overwrite_original")
        .arg("-TagsFromFile")
        .path_arg(source)
        .arg("-all:all")
        .path_arg(target)
}

/// Stamp the exif capture dates with `datetime` (`YYYY:MM:DD HH:MM:SS`).
pub fn date_command(cfg: &ToolConfig, datetime: &str, target: &Path) -> ServiceCommand {
    ServiceCommand::new(&cfg.exiftool_bin)
        .arg("-overwrite_original")
        .arg(format!("-DateTimeOriginal={datetime}"))
        .arg(format!("-CreateDate={datetime}"))
        .arg(format!("-ModifyDate={datetime}"))
        .path_arg(target)
}

pub fn package_command(cfg: &ToolConfig, params: &SpatialParams, input: &Path) -> ServiceCommand {
    let cmd = ServiceCommand::new(&cfg.spatial_bin);
    let cmd = match params.fov {
        FieldOfView::Horizontal { degrees } => cmd.arg("--hfov").arg(format_number(degrees)),
        FieldOfView::Lens {
            sensor_width_mm,
            focal_length_mm,
        } => cmd
            .arg("-s")
            .arg(format_number(sensor_width_mm))
            .arg("-f")
            .arg(format_number(focal_length_mm)),
    };
    cmd.arg("-b")
        .arg(format_number(params.baseline_mm))
        .path_arg(input)
}

/// `73` rather than `73.0`, `23.5` stays `23.5`.
fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}
