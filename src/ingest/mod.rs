//! Frame ingestion sources.
//!
//! This module provides the sources the capture loop reads from:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - USB/V4L2 devices by index (feature: ingest-v4l2)
//! - Synthetic `stub://` scenes (testing, demos)
//!
//! All sources implement `FrameSource`. A source reports its frame size and,
//! when it knows it, its frame rate; `probe_fps` estimates the rate otherwise.
//! A source that returns `Ok(None)` is exhausted. Read errors are treated the
//! same way by the capture loop (end of file and device disconnects both end
//! the stream).

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use std::time::Instant;

use crate::frame::{Frame, FrameSize};

/// Measured rates above this are treated as timing noise and clamped.
pub const MAX_PROBED_FPS: f64 = 240.0;

pub use file::FileSource;
pub use synthetic::{MotionSchedule, SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Frames read when a source cannot report its own frame rate.
pub const FPS_PROBE_FRAMES: u32 = 360;

/// A readable stream of frames.
pub trait FrameSource {
    /// Next frame, or `None` once the stream is exhausted.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Size of the frames this source produces.
    fn frame_size(&self) -> FrameSize;

    /// Frame rate reported by the container or device, if any.
    fn frames_per_second(&self) -> Option<f64>;

    /// Seek back to the first frame. Live sources cannot.
    fn rewind(&mut self) -> Result<()> {
        Err(anyhow!("{} cannot rewind", self.describe()))
    }

    /// Human-readable source name for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        (**self).read_frame()
    }

    fn frame_size(&self) -> FrameSize {
        (**self).frame_size()
    }

    fn frames_per_second(&self) -> Option<f64> {
        (**self).frames_per_second()
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Where to capture from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Local file path, or `stub://<name>` for a synthetic scene.
    File(String),
    /// Capture device index (`/dev/video<N>`).
    Device(u32),
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "file {}", path),
            Self::Device(index) => write!(f, "device {}", index),
        }
    }
}

/// Open the source named by `spec`.
pub fn open_source(spec: &SourceSpec) -> Result<Box<dyn FrameSource>> {
    match spec {
        SourceSpec::File(path) => Ok(Box::new(FileSource::open(path)?)),
        SourceSpec::Device(index) => open_device(*index),
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(index: u32) -> Result<Box<dyn FrameSource>> {
    let mut source = V4l2Source::new(v4l2::V4l2Config {
        device: format!("/dev/video{}", index),
        ..v4l2::V4l2Config::default()
    })?;
    source.connect()?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(index: u32) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "capture from device {} requires the ingest-v4l2 feature",
        index
    ))
}

/// Frame rate of `source`: the reported value when positive, otherwise the
/// rate measured by timing `probe_frames` reads.
///
/// Probed sources are rewound afterwards; live sources that cannot rewind
/// simply lose the probe frames.
pub fn resolve_fps<S: FrameSource + ?Sized>(source: &mut S, probe_frames: u32) -> Result<f64> {
    if let Some(fps) = source.frames_per_second().filter(|fps| *fps > 0.0) {
        return Ok(fps);
    }
    let fps = probe_fps(source, probe_frames)?;
    log::info!(
        "{} did not report a frame rate; measured {:.2} fps over {} frames",
        source.describe(),
        fps,
        probe_frames
    );
    Ok(fps)
}

/// Time up to `frames` reads and return reads per second.
pub fn probe_fps<S: FrameSource + ?Sized>(source: &mut S, frames: u32) -> Result<f64> {
    let start = Instant::now();
    let mut read = 0u32;
    while read < frames.max(1) {
        match source.read_frame()? {
            Some(_) => read += 1,
            None => break,
        }
    }
    let elapsed = start.elapsed().as_secs_f64();
    if read == 0 {
        return Err(anyhow!(
            "{} produced no frames while probing frame rate",
            source.describe()
        ));
    }
    if let Err(err) = source.rewind() {
        log::warn!("fps probe consumed {} frames: {}", read, err);
    }
    let measured = read as f64 / elapsed.max(f64::EPSILON);
    if measured > MAX_PROBED_FPS {
        log::warn!(
            "measured {:.0} fps from {}; clamping to {}",
            measured,
            source.describe(),
            MAX_PROBED_FPS
        );
        return Ok(MAX_PROBED_FPS);
    }
    Ok(measured)
}
