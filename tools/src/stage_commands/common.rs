use chrono::NaiveDateTime;
use data_contracts::spatial::{FieldOfView, SpatialParams};

/// Which stages run for every pair, plus the packager geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineOptions {
    /// Bake EXIF orientation into the pixels before anything else.
    pub bake_orientation: bool,
    /// Undistort wide/fisheye lenses; off for rectilinear lenses.
    pub lens_correction: bool,
    /// Centre-crop to the configured aspect ratio during correction.
    pub crop: bool,
    /// Write the capture date encoded in the filename into the aligned image.
    pub date_from_filename: bool,
    /// Run the spatial-photo packager; off leaves the aligned tiff as output.
    pub package: bool,
    pub spatial: SpatialParams,
}

pub const DEFAULT_OPTIONS: PipelineOptions = PipelineOptions {
    bake_orientation: false,
    lens_correction: true,
    crop: false,
    date_from_filename: false,
    package: true,
    spatial: SpatialParams {
        baseline_mm: 73.0,
        fov: FieldOfView::Horizontal { degrees: 170.0 },
    },
};

impl Default for PipelineOptions {
    fn default() -> Self {
        DEFAULT_OPTIONS
    }
}

impl PipelineOptions {
    pub fn with_bake_orientation(mut self, on: bool) -> Self {
        self.bake_orientation = on;
        self
    }

    pub fn with_lens_correction(mut self, on: bool) -> Self {
        self.lens_correction = on;
        self
    }

    pub fn with_crop(mut self, on: bool) -> Self {
        self.crop = on;
        self
    }

    pub fn with_date_from_filename(mut self, on: bool) -> Self {
        self.date_from_filename = on;
        self
    }

    pub fn with_package(mut self, on: bool) -> Self {
        self.package = on;
        self
    }

    pub fn with_spatial(mut self, spatial: SpatialParams) -> Self {
        self.spatial = spatial;
        self
    }

    /// The ffmpeg pass runs when either lens correction or cropping is wanted.
    pub fn needs_correction_pass(&self) -> bool {
        self.lens_correction || self.crop
    }
}

const FLIP_HORIZONTAL: &[&str] = &["-flip", "horizontal"];
const ROTATE_180: &[&str] = &["-rotate", "180"];
const FLIP_VERTICAL: &[&str] = &["-flip", "vertical"];
const TRANSPOSE: &[&str] = &["-transpose"];
const ROTATE_90: &[&str] = &["-rotate", "90"];
const TRANSVERSE: &[&str] = &["-transverse"];
const ROTATE_270: &[&str] = &["-rotate", "270"];

/// jpegtran arguments that undo an EXIF orientation value.
pub fn orientation_transform(orientation: u8) -> Option<&'static [&'static str]> {
    match orientation {
        2 => Some(FLIP_HORIZONTAL),
        3 => Some(ROTATE_180),
        4 => Some(FLIP_VERTICAL),
        5 => Some(TRANSPOSE),
        6 => Some(ROTATE_90),
        7 => Some(TRANSVERSE),
        8 => Some(ROTATE_270),
        _ => None,
    }
}

/// Parse the bare numeric orientation printed by `exiftool -Orientation# -s -s -s`.
/// Empty output means the tag is absent, which is treated as upright.
pub fn parse_orientation(stdout: &str) -> Result<u8, String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(1);
    }
    trimmed
        .parse::<u8>()
        .map_err(|_| format!("unexpected orientation value {trimmed:?}"))
}

/// Exif date (`YYYY:MM:DD HH:MM:SS`) from a name containing
/// `IMG<YYYYMMDD>-<HHMMSS>`. Fails when no such run exists or the digits do
/// not form a real calendar date and time.
pub fn capture_datetime(file_name: &str) -> Result<String, String> {
    let mut found = None;
    for (at, _) in file_name.match_indices("IMG") {
        let rest = &file_name.as_bytes()[at + 3..];
        let shaped = rest.len() >= 15
            && rest[..8].iter().all(u8::is_ascii_digit)
            && rest[8] == b'-'
            && rest[9..15].iter().all(u8::is_ascii_digit);
        if shaped {
            found = Some(&file_name[at + 3..at + 18]);
            break;
        }
    }
    let Some(digits) = found else {
        return Err(format!("{file_name} has no IMG<date>-<time> capture stamp"));
    };
    let spaced = format!(
        "{}-{}-{} {}:{}:{}",
        &digits[0..4],
        &digits[4..6],
        &digits[6..8],
        &digits[9..11],
        &digits[11..13],
        &digits[13..15]
    );
    NaiveDateTime::parse_from_str(&spaced, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.format("%Y:%m:%d %H:%M:%S").to_string())
        .map_err(|err| format!("{file_name}: {digits} is not a valid date and time ({err})"))
}
