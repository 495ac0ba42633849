use std::path::{Path, PathBuf};

use cli_support::common::{FovMode, GeometryDefaults};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_CONFIG_NAME: &str = "spatialpair.toml";
pub const CONFIG_ENV_VAR: &str = "SPATIALPAIR_CONFIG";
const DEFAULT_LENS_PARAMS: &str = "k1=-0.2:k2=-0.025";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// External tool locations and tuning for the processing stages.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub ffmpeg_bin: PathBuf,
    pub exiftool_bin: PathBuf,
    pub align_bin: PathBuf,
    pub spatial_bin: PathBuf,
    pub jpegtran_bin: PathBuf,
    /// Arguments for ffmpeg's `lenscorrection` filter.
    pub lens_params: String,
    /// ffmpeg `-q:v` value for corrected JPEGs (2 is near-lossless).
    pub jpeg_quality: u8,
    /// Target aspect ratio `(w, h)` for `--crop`.
    pub crop_aspect: (u32, u32),
    pub align_tolerance: u32,
    pub geometry: GeometryDefaults,
    /// Extension the packager gives its output file.
    pub spatial_extension: String,
    /// Largest timestamp difference tolerated silently within a pair.
    pub max_timestamp_skew: u64,
    pub jobs: usize,
    pub work_dir_name: String,
    pub keep_work: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            exiftool_bin: PathBuf::from("exiftool"),
            align_bin: PathBuf::from("StereoAutoAlign"),
            spatial_bin: PathBuf::from("spatialPhotoTool"),
            jpegtran_bin: PathBuf::from("jpegtran"),
            lens_params: DEFAULT_LENS_PARAMS.to_string(),
            jpeg_quality: 2,
            crop_aspect: (4, 3),
            align_tolerance: 10,
            geometry: GeometryDefaults {
                mode: FovMode::Horizontal,
                baseline_mm: 73.0,
                hfov_degrees: 170.0,
                sensor_width_mm: 23.5,
                focal_length_mm: 23.0,
            },
            spatial_extension: "heic".to_string(),
            max_timestamp_skew: 2,
            jobs: 1,
            work_dir_name: ".spatialpair-work".to_string(),
            keep_work: false,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ToolConfigFile {
    tools: Option<ToolsSection>,
    lens: Option<LensSection>,
    align: Option<AlignSection>,
    spatial: Option<SpatialSection>,
    pairing: Option<PairingSection>,
    run: Option<RunSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ToolsSection {
    ffmpeg: Option<String>,
    exiftool: Option<String>,
    stereo_align: Option<String>,
    spatial_photo: Option<String>,
    jpegtran: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LensSection {
    params: Option<String>,
    quality: Option<u8>,
    crop_aspect: Option<[u32; 2]>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AlignSection {
    tolerance: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SpatialSection {
    fov: Option<FovSetting>,
    baseline_mm: Option<f64>,
    hfov: Option<f64>,
    sensor_width_mm: Option<f64>,
    focal_length_mm: Option<f64>,
    extension: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FovSetting {
    Horizontal,
    Lens,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PairingSection {
    max_timestamp_skew: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RunSection {
    jobs: Option<usize>,
    work_dir: Option<String>,
    keep_work: Option<bool>,
}

impl ToolConfig {
    /// Load from an explicit path, else `$SPATIALPAIR_CONFIG`, else
    /// `spatialpair.toml` in the working directory, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let cfg = if let Some(path) = explicit {
            Self::from_path(path)?
        } else if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            Self::from_path(Path::new(&path))?
        } else if Path::new(DEFAULT_CONFIG_NAME).exists() {
            Self::from_path(Path::new(DEFAULT_CONFIG_NAME))?
        } else {
            Self::default()
        };
        cfg.validate()?;
        cfg.warn_if_suspicious();
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        let file: ToolConfigFile = toml::from_str(raw)?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: ToolConfigFile) -> Self {
        let base = Self::default();
        let tools = file.tools.unwrap_or_default();
        let lens = file.lens.unwrap_or_default();
        let spatial = file.spatial.unwrap_or_default();
        let run = file.run.unwrap_or_default();
        let bin = |v: Option<String>, fallback: PathBuf| v.map(|v| expand_path(&v)).unwrap_or(fallback);

        ToolConfig {
            ffmpeg_bin: bin(tools.ffmpeg, base.ffmpeg_bin),
            exiftool_bin: bin(tools.exiftool, base.exiftool_bin),
            align_bin: bin(tools.stereo_align, base.align_bin),
            spatial_bin: bin(tools.spatial_photo, base.spatial_bin),
            jpegtran_bin: bin(tools.jpegtran, base.jpegtran_bin),
            lens_params: lens
                .params
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(base.lens_params),
            jpeg_quality: lens.quality.unwrap_or(base.jpeg_quality),
            crop_aspect: lens
                .crop_aspect
                .map(|[w, h]| (w, h))
                .unwrap_or(base.crop_aspect),
            align_tolerance: file
                .align
                .and_then(|a| a.tolerance)
                .unwrap_or(base.align_tolerance),
            geometry: GeometryDefaults {
                mode: spatial_mode(&spatial),
                baseline_mm: spatial.baseline_mm.unwrap_or(base.geometry.baseline_mm),
                hfov_degrees: spatial.hfov.unwrap_or(base.geometry.hfov_degrees),
                sensor_width_mm: spatial
                    .sensor_width_mm
                    .unwrap_or(base.geometry.sensor_width_mm),
                focal_length_mm: spatial
                    .focal_length_mm
                    .unwrap_or(base.geometry.focal_length_mm),
            },
            spatial_extension: spatial
                .extension
                .map(|e| e.trim_start_matches('.').to_string())
                .unwrap_or(base.spatial_extension),
            max_timestamp_skew: file
                .pairing
                .and_then(|p| p.max_timestamp_skew)
                .unwrap_or(base.max_timestamp_skew),
            jobs: run.jobs.unwrap_or(base.jobs),
            work_dir_name: run.work_dir.unwrap_or(base.work_dir_name),
            keep_work: run.keep_work.unwrap_or(base.keep_work),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs == 0 {
            return Err(ConfigError::Invalid("run.jobs must be at least 1".into()));
        }
        if self.crop_aspect.0 == 0 || self.crop_aspect.1 == 0 {
            return Err(ConfigError::Invalid(
                "lens.crop_aspect entries must be non-zero".into(),
            ));
        }
        if self.spatial_extension.is_empty() {
            return Err(ConfigError::Invalid("spatial.extension is empty".into()));
        }
        let work = Path::new(&self.work_dir_name);
        if self.work_dir_name.trim().is_empty()
            || work.is_absolute()
            || work.components().count() != 1
        {
            return Err(ConfigError::Invalid(
                "run.work_dir must be a single relative directory name".into(),
            ));
        }
        Ok(())
    }

    fn warn_if_suspicious(&self) {
        for (name, bin) in [
            ("ffmpeg", &self.ffmpeg_bin),
            ("exiftool", &self.exiftool_bin),
            ("stereo_align", &self.align_bin),
            ("spatial_photo", &self.spatial_bin),
            ("jpegtran", &self.jpegtran_bin),
        ] {
            if bin.as_os_str().is_empty() {
                warn!("tools.{name} is empty; stages using it will fail to launch");
            }
        }
        if !(1..=31).contains(&self.jpeg_quality) {
            warn!(
                quality = self.jpeg_quality,
                "lens.quality is outside ffmpeg's 1-31 JPEG range"
            );
        }
    }
}

/// An explicit `fov` wins; otherwise giving lens dimensions selects lens mode.
fn spatial_mode(spatial: &SpatialSection) -> FovMode {
    match spatial.fov {
        Some(FovSetting::Horizontal) => FovMode::Horizontal,
        Some(FovSetting::Lens) => FovMode::Lens,
        None if spatial.sensor_width_mm.is_some() || spatial.focal_length_mm.is_some() => {
            FovMode::Lens
        }
        None => FovMode::Horizontal,
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&format!("${{{key}}}")),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = ToolConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.align_bin, PathBuf::from("StereoAutoAlign"));
        assert_eq!(cfg.lens_params, DEFAULT_LENS_PARAMS);
        assert_eq!(cfg.crop_aspect, (4, 3));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ToolConfig::from_toml_str("[tools]\nffmpg = \"x\"\n").is_err());
    }

    #[test]
    fn expands_unknown_env_verbatim() {
        assert_eq!(
            expand_env("/opt/${SPATIALPAIR_SURELY_UNSET_VAR}/bin"),
            "/opt/${SPATIALPAIR_SURELY_UNSET_VAR}/bin"
        );
        assert_eq!(expand_env("plain/${unterminated"), "plain/${unterminated");
    }

    #[test]
    fn explicit_fov_overrides_lens_fields() {
        let cfg = ToolConfig::from_toml_str(
            "[spatial]\nfov = \"horizontal\"\nsensor_width_mm = 36\n",
        )
        .unwrap();
        assert_eq!(cfg.geometry.mode, FovMode::Horizontal);
        assert!(ToolConfig::from_toml_str("[spatial]\nfov = \"fisheye\"\n").is_err());
    }

    #[test]
    fn rejects_nested_work_dir() {
        let cfg = ToolConfig {
            work_dir_name: "a/b".into(),
            ..ToolConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
