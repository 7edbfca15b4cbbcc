use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::assemble::AssemblerSettings;
use crate::capture::CaptureSettings;
use crate::detect::{AreaMode, MotionConfig, ReferenceReset, RegionFilter, RoiOffset};
use crate::frame::MAX_PROCESSING_WIDTH;
use crate::ingest::FPS_PROBE_FRAMES;
use crate::writer::ffmpeg::{DEFAULT_FFMPEG, DEFAULT_PRESET};
use crate::writer::CompressionLevel;

const DEFAULT_OUTPUT_DIR: &str = "clips";
const DEFAULT_CONTAINER_EXT: &str = "avi";
const DEFAULT_CLIP_DURATION_SECS: f64 = 10.0;
const DEFAULT_MIN_RELATIVE_AREA: f64 = 0.01;
const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_STALL_LIMIT: u32 = 10;
const DEFAULT_REFERENCE_RESET_FRAMES: u32 = 600;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ClipdConfigFile {
    detector: Option<DetectorConfigFile>,
    capture: Option<CaptureConfigFile>,
    clips: Option<ClipsConfigFile>,
    encoder: Option<EncoderConfigFile>,
    upload: Option<UploadConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    mask_threshold: Option<u8>,
    binary_threshold: Option<u8>,
    blur_sigma: Option<f32>,
    close_radius: Option<u8>,
    close_iterations: Option<u8>,
    area_mode: Option<AreaMode>,
    min_relative_area: Option<f64>,
    /// Explicit `null` disables reference resets.
    #[serde(default, deserialize_with = "nullable")]
    reference_reset_frames: Option<Option<u32>>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    max_processing_width: Option<u32>,
    fps_probe_frames: Option<u32>,
    pace_to_fps: Option<bool>,
    max_outstanding_messages: Option<usize>,
    roi: Option<RoiOffset>,
}

#[derive(Debug, Deserialize, Default)]
struct ClipsConfigFile {
    duration_secs: Option<f64>,
    output_dir: Option<PathBuf>,
    container_ext: Option<String>,
    receive_timeout_ms: Option<u64>,
    stall_limit: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct EncoderConfigFile {
    ffmpeg_bin: Option<PathBuf>,
    compression_level: Option<String>,
    crf: Option<u8>,
    preset: Option<String>,
    keep_compressed: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    base_url: Option<String>,
    accept_invalid_certs: Option<bool>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone)]
pub struct ClipdConfig {
    pub detector: DetectorSettings,
    pub capture: CaptureConfig,
    pub clips: ClipSettings,
    pub encoder: EncoderSettings,
    pub upload: UploadSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub motion: MotionConfig,
    pub filter: RegionFilter,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub settings: CaptureSettings,
    pub max_outstanding_messages: usize,
}

#[derive(Debug, Clone)]
pub struct ClipSettings {
    pub duration_secs: f64,
    pub output_dir: PathBuf,
    pub container_ext: String,
    pub receive_timeout: Duration,
    pub stall_limit: u32,
}

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub ffmpeg_bin: PathBuf,
    pub compression_level: CompressionLevel,
    /// Overrides the level's CRF when set.
    pub crf: Option<u8>,
    pub preset: String,
    pub keep_compressed: bool,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Upload is disabled when unset.
    pub base_url: Option<String>,
    pub accept_invalid_certs: bool,
}

impl ClipSettings {
    pub fn assembler_settings(&self) -> AssemblerSettings {
        AssemblerSettings {
            output_dir: self.output_dir.clone(),
            container_ext: self.container_ext.clone(),
            clip_duration_secs: self.duration_secs,
            receive_timeout: self.receive_timeout,
            stall_limit: self.stall_limit,
        }
    }
}

impl EncoderSettings {
    pub fn effective_crf(&self) -> u8 {
        self.crf.unwrap_or_else(|| self.compression_level.crf())
    }
}

impl ClipdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MOTION_CLIP_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ClipdConfigFile) -> Self {
        let detector = file.detector.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let clips = file.clips.unwrap_or_default();
        let encoder = file.encoder.unwrap_or_default();
        let upload = file.upload.unwrap_or_default();

        let defaults = MotionConfig::default();
        let reference_reset = match detector.reference_reset_frames {
            Some(None) => ReferenceReset::Never,
            Some(Some(frames)) => ReferenceReset::AfterIdleFrames(frames),
            None => ReferenceReset::AfterIdleFrames(DEFAULT_REFERENCE_RESET_FRAMES),
        };
        let motion = MotionConfig {
            mask_threshold: detector.mask_threshold.unwrap_or(defaults.mask_threshold),
            binary_threshold: detector
                .binary_threshold
                .unwrap_or(defaults.binary_threshold),
            blur_sigma: detector.blur_sigma.unwrap_or(defaults.blur_sigma),
            close_radius: detector.close_radius.unwrap_or(defaults.close_radius),
            close_iterations: detector
                .close_iterations
                .unwrap_or(defaults.close_iterations),
            reference_reset,
        };
        let filter = RegionFilter::new(
            detector
                .min_relative_area
                .unwrap_or(DEFAULT_MIN_RELATIVE_AREA),
            detector.area_mode.unwrap_or_default(),
        );

        Self {
            detector: DetectorSettings { motion, filter },
            capture: CaptureConfig {
                settings: CaptureSettings {
                    max_processing_width: capture
                        .max_processing_width
                        .unwrap_or(MAX_PROCESSING_WIDTH),
                    roi: capture.roi.unwrap_or_default(),
                    pace_to_fps: capture.pace_to_fps.unwrap_or(false),
                    fps_probe_frames: capture.fps_probe_frames.unwrap_or(FPS_PROBE_FRAMES),
                },
                max_outstanding_messages: capture
                    .max_outstanding_messages
                    .unwrap_or(crate::channel::DEFAULT_MAX_OUTSTANDING),
            },
            clips: ClipSettings {
                duration_secs: clips.duration_secs.unwrap_or(DEFAULT_CLIP_DURATION_SECS),
                output_dir: clips
                    .output_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
                container_ext: clips
                    .container_ext
                    .unwrap_or_else(|| DEFAULT_CONTAINER_EXT.to_string()),
                receive_timeout: Duration::from_millis(
                    clips
                        .receive_timeout_ms
                        .unwrap_or(DEFAULT_RECEIVE_TIMEOUT_MS),
                ),
                stall_limit: clips.stall_limit.unwrap_or(DEFAULT_STALL_LIMIT),
            },
            encoder: EncoderSettings {
                ffmpeg_bin: encoder
                    .ffmpeg_bin
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG)),
                compression_level: encoder
                    .compression_level
                    .as_deref()
                    .map(CompressionLevel::from_code)
                    .unwrap_or_default(),
                crf: encoder.crf,
                preset: encoder
                    .preset
                    .unwrap_or_else(|| DEFAULT_PRESET.to_string()),
                keep_compressed: encoder.keep_compressed.unwrap_or(false),
            },
            upload: UploadSettings {
                base_url: upload.base_url.filter(|url| !url.trim().is_empty()),
                accept_invalid_certs: upload.accept_invalid_certs.unwrap_or(true),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("API_BASE_URL") {
            if !url.trim().is_empty() {
                self.upload.base_url = Some(url);
            }
        }
        if let Ok(dir) = std::env::var("MOTION_CLIP_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.clips.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(secs) = std::env::var("MOTION_CLIP_DURATION_SECS") {
            self.clips.duration_secs = secs.trim().parse().map_err(|_| {
                anyhow!("MOTION_CLIP_DURATION_SECS must be a number of seconds")
            })?;
        }
        if let Ok(area) = std::env::var("MOTION_CLIP_MIN_AREA") {
            self.detector.filter.min_relative_area = area.trim().parse().map_err(|_| {
                anyhow!("MOTION_CLIP_MIN_AREA must be a fraction such as 0.01")
            })?;
        }
        if let Ok(insecure) = std::env::var("MOTION_CLIP_INSECURE_TLS") {
            self.upload.accept_invalid_certs = parse_bool(&insecure).ok_or_else(|| {
                anyhow!("MOTION_CLIP_INSECURE_TLS must be true/false, 1/0 or yes/no")
            })?;
        }
        if let Ok(bin) = std::env::var("MOTION_CLIP_FFMPEG") {
            if !bin.trim().is_empty() {
                self.encoder.ffmpeg_bin = PathBuf::from(bin);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(self.clips.duration_secs.is_finite() && self.clips.duration_secs > 0.0) {
            return Err(anyhow!("clip duration must be greater than zero"));
        }
        let area = self.detector.filter.min_relative_area;
        if !(area > 0.0 && area < 1.0) {
            return Err(anyhow!("min_relative_area must be between 0 and 1"));
        }
        if self.capture.settings.max_processing_width == 0 {
            return Err(anyhow!("max_processing_width must be greater than zero"));
        }
        if self.capture.max_outstanding_messages == 0 {
            return Err(anyhow!("max_outstanding_messages must be greater than zero"));
        }
        if self.detector.motion.binary_threshold == 0 {
            return Err(anyhow!("binary_threshold must be greater than zero"));
        }
        if !(self.detector.motion.blur_sigma > 0.0) {
            return Err(anyhow!("blur_sigma must be greater than zero"));
        }
        self.clips.container_ext = self
            .clips
            .container_ext
            .trim()
            .trim_start_matches('.')
            .to_lowercase();
        if self.clips.container_ext.is_empty() {
            return Err(anyhow!("container_ext must not be empty"));
        }
        if self.clips.container_ext == "mp4" {
            return Err(anyhow!(
                "container_ext mp4 collides with the compressed output"
            ));
        }
        if self.clips.receive_timeout.is_zero() {
            return Err(anyhow!("receive_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ClipdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
