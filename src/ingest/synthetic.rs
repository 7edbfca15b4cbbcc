//! Synthetic frame source (`stub://`).
//!
//! Produces a static background with an optional scheduled moving block, so
//! the full pipeline can run without a camera or decoder.

use anyhow::Result;

use super::FrameSource;
use crate::frame::{Frame, FrameSize};

const BACKGROUND: [u8; 3] = [40, 40, 40];
const BLOCK: [u8; 3] = [230, 230, 230];

/// A block crossing the scene for a window of frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionSchedule {
    /// First frame (0-based) showing the block.
    pub start_frame: u64,
    /// Number of frames the block is visible.
    pub frames: u64,
    pub block_width: u32,
    pub block_height: u32,
    /// Horizontal pixels moved per frame.
    pub step: u32,
}

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub size: FrameSize,
    /// Reported frame rate. `None` makes the pipeline probe it.
    pub fps: Option<f64>,
    /// Frames before the source is exhausted. `None` runs forever.
    pub total_frames: Option<u64>,
    pub motion: Option<MotionSchedule>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://scene".to_string(),
            size: FrameSize::new(320, 240),
            fps: Some(10.0),
            total_frames: Some(600),
            // 40x40 on 320x240 covers about 2% of the frame.
            motion: Some(MotionSchedule {
                start_frame: 100,
                frames: 30,
                block_width: 40,
                block_height: 40,
                step: 4,
            }),
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    /// Default scene under the given `stub://` name.
    pub fn named(name: &str) -> Self {
        log::info!("SyntheticSource: connected to {} (synthetic)", name);
        Self::new(SyntheticConfig {
            name: name.to_string(),
            ..SyntheticConfig::default()
        })
    }

    pub fn frames_read(&self) -> u64 {
        self.frame_count
    }

    fn render(&self, index: u64) -> Frame {
        let mut frame = Frame::filled(self.config.size, BACKGROUND);
        if let Some(motion) = self.config.motion {
            if index >= motion.start_frame && index < motion.start_frame + motion.frames {
                let travel = self.config.size.width.saturating_sub(motion.block_width).max(1);
                let offset = (index - motion.start_frame) * motion.step as u64;
                let x = (offset % travel as u64) as u32;
                let y = self.config.size.height.saturating_sub(motion.block_height) / 2;
                frame.fill_rect(x, y, motion.block_width, motion.block_height, BLOCK);
            }
        }
        frame
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(total) = self.config.total_frames {
            if self.frame_count >= total {
                return Ok(None);
            }
        }
        let frame = self.render(self.frame_count);
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn frame_size(&self) -> FrameSize {
        self.config.size
    }

    fn frames_per_second(&self) -> Option<f64> {
        self.config.fps
    }

    fn rewind(&mut self) -> Result<()> {
        self.frame_count = 0;
        Ok(())
    }

    fn describe(&self) -> String {
        self.config.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_ends_after_total() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticConfig {
            total_frames: Some(2),
            ..SyntheticConfig::default()
        });
        assert!(source.read_frame()?.is_some());
        assert!(source.read_frame()?.is_some());
        assert!(source.read_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn block_only_inside_schedule() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticConfig {
            size: FrameSize::new(64, 48),
            total_frames: Some(4),
            motion: Some(MotionSchedule {
                start_frame: 1,
                frames: 2,
                block_width: 8,
                block_height: 8,
                step: 2,
            }),
            ..SyntheticConfig::default()
        });
        let background = Frame::filled(FrameSize::new(64, 48), BACKGROUND);
        let frames: Vec<Frame> = std::iter::from_fn(|| source.read_frame().transpose())
            .collect::<Result<_>>()?;
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], background);
        assert_ne!(frames[1], background);
        assert_ne!(frames[2], frames[1]);
        assert_eq!(frames[3], background);
        Ok(())
    }
}
