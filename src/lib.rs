//! Motion Clipper
//!
//! This crate watches a video stream, detects when something moves, and turns
//! each motion episode into a fixed-length clip that is encoded, compressed,
//! and optionally uploaded.
//!
//! # Architecture
//!
//! Two execution contexts share nothing but a channel:
//!
//! 1. **Capture** (`capture`): read frame → resize → detect → filter → send.
//! 2. **Assembly** (`assemble`): receive → drive `ClipSegmenter` → dispatch.
//!
//! Dispatched clips are written by the `WriterPool` on one thread per clip, so
//! encoding never blocks assembly and shutdown can wait for every job.
//!
//! # Module Structure
//!
//! - `frame`: RGB frame buffers and processing-size rules
//! - `ingest`: Frame sources (local files, V4L2 devices, synthetic scenes)
//! - `detect`: Background-subtraction detector and region filtering
//! - `channel`: Capture-to-assembly message protocol
//! - `clip`: Clips, naming, and the segmentation state machine
//! - `writer`: Encode → compress → upload → cleanup jobs
//! - `upload`: Clips API payload and HTTP transport
//! - `config`: `clipd` configuration (JSON file + environment)

pub mod assemble;
pub mod capture;
pub mod channel;
pub mod clip;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod upload;
pub mod writer;

pub use assemble::{spawn_assembler, AssemblerSettings, AssemblerStats, ClipAssembler, ClipSink};
pub use capture::{run_capture, CaptureSettings, CaptureStats};
pub use channel::{channel, ChannelError, ChannelMessage, FrameReceiver, FrameSender, StreamInfo};
pub use clip::{Clip, ClipEnding, ClipName, ClipSegmenter, FrameRecord, SegmenterState};
pub use config::ClipdConfig;
pub use detect::{
    AreaMode, BoundingBox, DetectorBackend, MotionConfig, MotionDetector, ReferenceReset, Region,
    RegionFilter, RoiOffset,
};
pub use frame::{Frame, FrameSize};
pub use ingest::{open_source, FileSource, FrameSource, SourceSpec, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::{v4l2::V4l2Config, V4l2Source};
pub use upload::{ClipSummary, DetectionEntry};
pub use writer::{ClipEncoder, Compressor, Uploader, WriterPool, WriterStages};
