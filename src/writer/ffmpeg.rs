//! FFmpeg command-line encoder and compressor.
//!
//! Both stages shell out to the `ffmpeg` binary. The encoder streams raw RGB24
//! frames through stdin into an MPEG-4 Part 2 (XVID-tagged) container. The
//! compressor re-encodes a file with libx264 at a quality chosen by
//! `CompressionLevel`.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{ClipEncoder, Compressor};
use crate::clip::Clip;

pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_PRESET: &str = "medium";

/// Coarse compression setting, mapped to an x264 CRF.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompressionLevel {
    /// `h`: smallest files.
    High,
    /// `m`
    #[default]
    Medium,
    /// `l`
    Low,
    /// Any other code: near-lossless.
    Minimal,
}

impl CompressionLevel {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "h" => Self::High,
            "m" => Self::Medium,
            "l" => Self::Low,
            _ => Self::Minimal,
        }
    }

    pub fn crf(self) -> u8 {
        match self {
            Self::High => 38,
            Self::Medium => 28,
            Self::Low => 22,
            Self::Minimal => 12,
        }
    }
}

/// Writes clips with `ffmpeg -f rawvideo -i - -c:v mpeg4 -vtag xvid`.
#[derive(Clone, Debug)]
pub struct FfmpegEncoder {
    pub ffmpeg_bin: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }

    pub fn build_args(clip: &Clip, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-v".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            clip.frame_size.to_string(),
            "-r".to_string(),
            format!("{}", clip.fps),
            "-i".to_string(),
            "-".to_string(),
            "-c:v".to_string(),
            "mpeg4".to_string(),
            "-vtag".to_string(),
            "xvid".to_string(),
            "-q:v".to_string(),
            "3".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG)
    }
}

impl ClipEncoder for FfmpegEncoder {
    fn encode(&self, clip: &Clip, path: &Path) -> Result<()> {
        if clip.is_empty() {
            return Err(anyhow!("refusing to encode an empty clip"));
        }
        let mut child = Command::new(&self.ffmpeg_bin)
            .args(Self::build_args(clip, path))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("launch {}", self.ffmpeg_bin.display()))?;

        let write_result = {
            let mut stdin = child
                .stdin
                .take()
                .context("ffmpeg stdin was not captured")?;
            clip.frames()
                .iter()
                .try_for_each(|record| stdin.write_all(record.frame.as_bytes()))
        };
        let output = child.wait_with_output().context("wait for ffmpeg encoder")?;
        check_status("encode", &output)?;
        write_result.context("stream frames to ffmpeg")?;
        Ok(())
    }
}

/// Re-encodes a clip with `libx264`.
#[derive(Clone, Debug)]
pub struct FfmpegCompressor {
    pub ffmpeg_bin: PathBuf,
    pub crf: u8,
    pub preset: String,
}

impl FfmpegCompressor {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, crf: u8) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            crf,
            preset: DEFAULT_PRESET.to_string(),
        }
    }

    pub fn with_level(ffmpeg_bin: impl Into<PathBuf>, level: CompressionLevel) -> Self {
        Self::new(ffmpeg_bin, level.crf())
    }

    pub fn build_args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-v".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

impl Compressor for FfmpegCompressor {
    fn compress(&self, raw: &Path) -> Result<PathBuf> {
        let raw = raw
            .canonicalize()
            .with_context(|| format!("resolve {}", raw.display()))?;
        let output_path = compressed_output_path(&raw);
        log::debug!(
            "compressing {} -> {} (crf {}, preset {})",
            raw.display(),
            output_path.display(),
            self.crf,
            self.preset
        );
        let output = Command::new(&self.ffmpeg_bin)
            .args(self.build_args(&raw, &output_path))
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("launch {}", self.ffmpeg_bin.display()))?;
        check_status("compress", &output)?;
        Ok(output_path)
    }
}

/// `<stem>.mp4` beside the input, or `<timestamp><stem>.mp4` when that name
/// is already taken.
pub fn compressed_output_path(input: &Path) -> PathBuf {
    let output = input.with_extension("mp4");
    if !output.exists() {
        return output;
    }
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    output.with_file_name(format!("{}{}.mp4", Utc::now().timestamp_millis(), stem))
}

fn check_status(stage: &str, output: &std::process::Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(anyhow!(
        "ffmpeg {} failed ({}): {}",
        stage,
        output.status,
        stderr.trim()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameSize};

    #[test]
    fn levels_map_to_crf() {
        assert_eq!(CompressionLevel::from_code("h").crf(), 38);
        assert_eq!(CompressionLevel::from_code("m").crf(), 28);
        assert_eq!(CompressionLevel::from_code("l").crf(), 22);
        assert_eq!(CompressionLevel::from_code("medium").crf(), 12);
        assert_eq!(CompressionLevel::default(), CompressionLevel::Medium);
    }

    #[test]
    fn output_path_avoids_existing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let raw = dir.path().join("42.avi");
        assert_eq!(compressed_output_path(&raw), dir.path().join("42.mp4"));

        std::fs::write(dir.path().join("42.mp4"), b"taken")?;
        let renamed = compressed_output_path(&raw);
        let name = renamed
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        assert_ne!(renamed, dir.path().join("42.mp4"));
        assert!(name.ends_with("42.mp4"), "{}", name);
        assert_eq!(renamed.parent(), Some(dir.path()));
        Ok(())
    }

    #[test]
    fn encoder_args_describe_raw_input() {
        let size = FrameSize::new(640, 360);
        let mut clip = Clip::with_capacity(12.5, size, 1);
        clip.append(Frame::filled(size, [0, 0, 0]), Vec::new());
        let args = FfmpegEncoder::build_args(&clip, Path::new("clips/7.avi"));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgb24 -s 640x360 -r 12.5 -i -"));
        assert!(joined.contains("-vtag xvid"));
        assert_eq!(args.last().map(String::as_str), Some("clips/7.avi"));
    }

    #[test]
    fn compressor_args_use_x264_settings() {
        let compressor = FfmpegCompressor::with_level("ffmpeg", CompressionLevel::High);
        let args = compressor.build_args(Path::new("a.avi"), Path::new("a.mp4"));
        assert_eq!(
            args.join(" "),
            "-y -hide_banner -v error -i a.avi -c:v libx264 -preset medium -crf 38 a.mp4"
        );
    }

    #[test]
    fn missing_binary_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let raw = dir.path().join("1.avi");
        std::fs::write(&raw, b"raw")?;
        let compressor = FfmpegCompressor::new(dir.path().join("no-such-ffmpeg"), 28);
        assert!(compressor.compress(&raw).is_err());

        let size = FrameSize::new(2, 2);
        let mut clip = Clip::with_capacity(10.0, size, 1);
        clip.append(Frame::filled(size, [0, 0, 0]), Vec::new());
        let encoder = FfmpegEncoder::new(dir.path().join("no-such-ffmpeg"));
        assert!(encoder.encode(&clip, &dir.path().join("2.avi")).is_err());
        Ok(())
    }
}
