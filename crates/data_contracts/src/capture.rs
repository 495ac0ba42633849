use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const NAME_PREFIX: &str = "IMG";
const IMAGE_EXTENSIONS: [&str; 2] = ["jpg", "jpeg"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CameraSide {
    Left,
    Right,
}

impl CameraSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraSide::Left => "left",
            CameraSide::Right => "right",
        }
    }
}

impl fmt::Display for CameraSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureNameError {
    #[error("malformed capture filename {name:?}: {reason}")]
    MalformedFilename { name: String, reason: &'static str },
}

/// Timestamp and sequence index carried by an `IMG<timestamp>-<index>.jpg` name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CaptureName {
    pub timestamp: u64,
    pub index: u32,
}

impl CaptureName {
    pub fn new(timestamp: u64, index: u32) -> Self {
        Self { timestamp, index }
    }

    /// Canonical filename for this capture (`IMG<ts>-<idx>.jpg`).
    pub fn file_name(&self) -> String {
        format!("{NAME_PREFIX}{}-{}.jpg", self.timestamp, self.index)
    }
}

/// Parse a camera-generated filename of the form `IMG<digits>-<digits>.jpg`.
///
/// The prefix and extension are matched case-insensitively and `.jpeg` is
/// accepted alongside `.jpg`.
pub fn parse_capture_name(file_name: &str) -> Result<CaptureName, CaptureNameError> {
    let malformed = |reason| CaptureNameError::MalformedFilename {
        name: file_name.to_string(),
        reason,
    };

    let (stem, ext) = file_name
        .rsplit_once('.')
        .ok_or_else(|| malformed("missing extension"))?;
    if !IMAGE_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    {
        return Err(malformed("unsupported extension"));
    }

    let prefix_len = NAME_PREFIX.len();
    let has_prefix = stem
        .get(..prefix_len)
        .is_some_and(|p| p.eq_ignore_ascii_case(NAME_PREFIX));
    if !has_prefix {
        return Err(malformed("missing IMG prefix"));
    }

    let (ts_digits, idx_digits) = stem[prefix_len..]
        .split_once('-')
        .ok_or_else(|| malformed("missing '-' between timestamp and index"))?;
    if !is_digit_run(ts_digits) {
        return Err(malformed("timestamp is not a digit run"));
    }
    if !is_digit_run(idx_digits) {
        return Err(malformed("index is not a digit run"));
    }

    let timestamp = ts_digits
        .parse::<u64>()
        .map_err(|_| malformed("timestamp out of range"))?;
    let index = idx_digits
        .parse::<u32>()
        .map_err(|_| malformed("index out of range"))?;
    Ok(CaptureName { timestamp, index })
}

fn is_digit_run(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// A parsed image from one side of the rig.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapturedImage {
    pub path: PathBuf,
    pub side: CameraSide,
    pub index: u32,
    pub timestamp: u64,
}

impl CapturedImage {
    pub fn from_path(path: &Path, side: CameraSide) -> Result<Self, CaptureNameError> {
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| CaptureNameError::MalformedFilename {
                name: path.display().to_string(),
                reason: "filename is not valid UTF-8",
            })?;
        let parsed = parse_capture_name(name)?;
        Ok(Self {
            path: path.to_path_buf(),
            side,
            index: parsed.index,
            timestamp: parsed.timestamp,
        })
    }

    /// Filename without extension, e.g. `IMG20240501-0007`.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| CaptureName::new(self.timestamp, self.index).file_name())
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PairError {
    #[error("expected a {expected} image, got {got} image {path:?}")]
    WrongSide {
        expected: CameraSide,
        got: CameraSide,
        path: PathBuf,
    },
}

/// A left/right capture of the same moment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImagePair {
    pub left: CapturedImage,
    pub right: CapturedImage,
    pub pair_index: usize,
}

impl ImagePair {
    pub fn new(
        left: CapturedImage,
        right: CapturedImage,
        pair_index: usize,
    ) -> Result<Self, PairError> {
        if left.side != CameraSide::Left {
            return Err(PairError::WrongSide {
                expected: CameraSide::Left,
                got: left.side,
                path: left.path,
            });
        }
        if right.side != CameraSide::Right {
            return Err(PairError::WrongSide {
                expected: CameraSide::Right,
                got: right.side,
                path: right.path,
            });
        }
        Ok(Self {
            left,
            right,
            pair_index,
        })
    }

    pub fn timestamp_skew(&self) -> u64 {
        self.left.timestamp.abs_diff(self.right.timestamp)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnpairedReason {
    /// The other camera has no frame at this position (missed trigger).
    MissedTrigger,
    /// Left over after the other side ran out of frames.
    Trailing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnpairedImage {
    pub image: CapturedImage,
    pub reason: UnpairedReason,
}

/// A directory entry that did not parse as a capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub side: CameraSide,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(side: CameraSide, index: u32) -> CapturedImage {
        CapturedImage {
            path: PathBuf::from(format!("IMG20240501-{index}.jpg")),
            side,
            index,
            timestamp: 20240501,
        }
    }

    #[test]
    fn parses_uppercase_extension() {
        let name = parse_capture_name("IMG20240501-0042.JPG").unwrap();
        assert_eq!(name, CaptureName::new(20240501, 42));
    }

    #[test]
    fn accepts_jpeg_and_lowercase_prefix() {
        let name = parse_capture_name("img7-3.jpeg").unwrap();
        assert_eq!(name, CaptureName::new(7, 3));
    }

    #[test]
    fn rejects_non_conforming_names() {
        for bad in [
            "IMG20240501-0042.png",
            "DSC0042.jpg",
            "IMG20240501.jpg",
            "IMG-0042.jpg",
            "IMG20240501-.jpg",
            "IMG2024a501-0042.jpg",
            "IMG20240501-0042-corrected.jpg",
            "IMG20240501-99999999999.jpg",
            "IMG20240501-0042",
        ] {
            assert!(
                matches!(
                    parse_capture_name(bad),
                    Err(CaptureNameError::MalformedFilename { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn pair_rejects_swapped_sides() {
        let err = ImagePair::new(image(CameraSide::Right, 1), image(CameraSide::Right, 1), 0)
            .unwrap_err();
        assert!(matches!(
            err,
            PairError::WrongSide {
                expected: CameraSide::Left,
                ..
            }
        ));
    }

    #[test]
    fn stem_drops_extension() {
        assert_eq!(image(CameraSide::Left, 5).stem(), "IMG20240501-5");
    }
}
