use anyhow::{anyhow, Result};

use super::Clip;
use crate::detect::Region;
use crate::frame::{Frame, FrameSize};

/// Whether a clip is being recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmenterState {
    Idle,
    Recording,
}

struct Recording {
    clip: Clip,
    target_frames: usize,
}

/// Duration-based clip state machine.
///
/// A clip starts on the first frame with motion, keeps every following frame
/// whether or not it has motion, and completes once it holds
/// `round(fps * clip_duration_secs)` frames.
pub struct ClipSegmenter {
    fps: f64,
    frame_size: FrameSize,
    clip_duration_secs: f64,
    current: Option<Recording>,
}

impl ClipSegmenter {
    pub fn new(fps: f64, frame_size: FrameSize, clip_duration_secs: f64) -> Self {
        Self {
            fps,
            frame_size,
            clip_duration_secs,
            current: None,
        }
    }

    /// Frames a clip started now would complete at. Never less than one.
    pub fn target_frames(&self) -> usize {
        (self.fps * self.clip_duration_secs).round().max(1.0) as usize
    }

    pub fn state(&self) -> SegmenterState {
        if self.current.is_some() {
            SegmenterState::Recording
        } else {
            SegmenterState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.current.is_some()
    }

    /// Frames in the clip being recorded; 0 when idle.
    pub fn current_len(&self) -> usize {
        self.current.as_ref().map_or(0, |r| r.clip.len())
    }

    /// Begin a clip. Returns false, leaving the current clip untouched, when
    /// already recording.
    pub fn try_start(&mut self) -> bool {
        if self.current.is_some() {
            return false;
        }
        let target_frames = self.target_frames();
        self.current = Some(Recording {
            clip: Clip::with_capacity(self.fps, self.frame_size, target_frames),
            target_frames,
        });
        true
    }

    /// Append a frame to the current clip. Returns false when idle.
    pub fn try_add_frame(&mut self, frame: Frame, regions: Vec<Region>) -> bool {
        match self.current.as_mut() {
            Some(recording) => {
                recording.clip.append(frame, regions);
                true
            }
            None => false,
        }
    }

    pub fn should_complete(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|r| r.clip.len() == r.target_frames)
    }

    /// Take the current clip and return to idle. Calling this while idle is a
    /// caller bug and is reported as an error.
    pub fn complete(&mut self) -> Result<Clip> {
        self.current
            .take()
            .map(|r| r.clip)
            .ok_or_else(|| anyhow!("clip completion requested while no clip is recording"))
    }

    /// Take the current clip, if any, and return to idle. A clip that never
    /// received a frame is discarded rather than returned.
    pub fn try_complete(&mut self) -> Option<Clip> {
        let recording = self.current.take()?;
        if recording.clip.is_empty() {
            return None;
        }
        Some(recording.clip)
    }
}
