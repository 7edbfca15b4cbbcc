//! Clips: ordered frames spanning one motion episode.
//!
//! - `Clip`: frames plus per-frame detection metadata, built by `ClipSegmenter`.
//! - `ClipName`: artifact naming for completed and shutdown-flushed clips.

mod segmenter;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::detect::{BoundingBox, Region};
use crate::frame::{Frame, FrameSize};

pub use segmenter::{ClipSegmenter, SegmenterState};

/// A frame captured while a clip is recording.
#[derive(Debug)]
pub struct FrameRecord {
    pub frame: Frame,
    /// Position of this frame inside its clip, starting at 0.
    pub index: usize,
    pub regions: Vec<Region>,
}

impl FrameRecord {
    /// Offset of this frame from the clip start, in whole milliseconds.
    pub fn timestamp_ms(&self, fps: f64) -> i64 {
        if fps <= 0.0 {
            return 0;
        }
        (self.index as f64 / fps * 1000.0).round() as i64
    }

    pub fn bounding_boxes(&self) -> impl Iterator<Item = BoundingBox> + '_ {
        self.regions.iter().map(|r| r.bbox)
    }
}

/// Upper bound on frame slots reserved up front; longer clips grow on append.
const MAX_PREALLOCATED_FRAMES: usize = 1024;

#[derive(Debug)]
pub struct Clip {
    frames: Vec<FrameRecord>,
    pub fps: f64,
    pub frame_size: FrameSize,
    /// Wall-clock time the clip started recording.
    pub started_at: DateTime<Utc>,
}

impl Clip {
    pub(crate) fn with_capacity(fps: f64, frame_size: FrameSize, capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity.min(MAX_PREALLOCATED_FRAMES)),
            fps,
            frame_size,
            started_at: Utc::now(),
        }
    }

    /// Append a frame, indexed by its position in the clip.
    pub(crate) fn append(&mut self, frame: Frame, regions: Vec<Region>) {
        let index = self.frames.len();
        self.frames.push(FrameRecord {
            frame,
            index,
            regions,
        });
    }

    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Playback length at the clip's frame rate.
    pub fn duration_secs(&self) -> f64 {
        if self.fps <= 0.0 {
            return 0.0;
        }
        self.frames.len() as f64 / self.fps
    }
}

/// Why a clip left the segmenter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipEnding {
    /// Reached its target frame count.
    Completed,
    /// Cut short by shutdown, a processing fault, or a stalled producer.
    Flushed,
}

/// File name of a clip artifact, keyed by the stream frame index at dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClipName {
    pub frame_index: u64,
    pub ending: ClipEnding,
}

impl ClipName {
    pub fn new(frame_index: u64, ending: ClipEnding) -> Self {
        Self {
            frame_index,
            ending,
        }
    }

    /// `<index>.<ext>` for completed clips, `<index>_clip.<ext>` for flushed ones.
    pub fn file_name(&self, ext: &str) -> String {
        match self.ending {
            ClipEnding::Completed => format!("{}.{}", self.frame_index, ext),
            ClipEnding::Flushed => format!("{}_clip.{}", self.frame_index, ext),
        }
    }

    pub fn path_in(&self, dir: &Path, ext: &str) -> PathBuf {
        dir.join(self.file_name(ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_names_follow_ending() {
        assert_eq!(ClipName::new(120, ClipEnding::Completed).file_name("avi"), "120.avi");
        assert_eq!(ClipName::new(7, ClipEnding::Flushed).file_name("avi"), "7_clip.avi");
        assert_eq!(
            ClipName::new(7, ClipEnding::Flushed).path_in(Path::new("clips"), "avi"),
            PathBuf::from("clips/7_clip.avi")
        );
    }

    #[test]
    fn frame_timestamps_round_to_milliseconds() {
        let size = FrameSize::new(2, 2);
        let mut clip = Clip::with_capacity(30.0, size, 3);
        for _ in 0..3 {
            clip.append(Frame::filled(size, [0, 0, 0]), Vec::new());
        }
        let stamps: Vec<i64> = clip.frames().iter().map(|f| f.timestamp_ms(clip.fps)).collect();
        assert_eq!(stamps, vec![0, 33, 67]);
        assert_eq!(clip.frames()[2].index, 2);
    }

    #[test]
    fn duration_follows_frame_count() {
        let size = FrameSize::new(2, 2);
        let mut clip = Clip::with_capacity(10.0, size, 5);
        for _ in 0..5 {
            clip.append(Frame::filled(size, [0, 0, 0]), Vec::new());
        }
        assert!((clip.duration_secs() - 0.5).abs() < 1e-9);
    }
}
