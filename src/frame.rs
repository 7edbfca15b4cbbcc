//! Frame buffers flowing through the pipeline.
//!
//! - `Frame`: owned RGB24 pixel buffer. Moves by value from source to channel to clip.
//! - `FrameSize`: width/height pair shared by sources, streams, and clips.
//!
//! Frames are never shared by reference across execution contexts. The capture
//! context owns a frame until it is moved into a channel message; from there the
//! clip-assembly context owns it until the clip is handed to a writer.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Bytes per pixel of every frame (packed RGB).
pub const FRAME_CHANNELS: u32 = 3;

/// Widest frame the detector processes; wider sources are scaled down.
pub const MAX_PROCESSING_WIDTH: u32 = 1280;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Size the detector works at for a source of this size.
    ///
    /// Width is capped at `max_width`; height follows the source aspect ratio,
    /// floored to whole pixels.
    pub fn processing_size(&self, max_width: u32) -> Result<FrameSize> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!(
                "source reported an empty frame size {}x{}",
                self.width,
                self.height
            ));
        }
        let width = self.width.min(max_width.max(1));
        let aspect = self.width as f64 / self.height as f64;
        let height = (width as f64 / aspect).floor().max(1.0) as u32;
        Ok(FrameSize::new(width, height))
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Owned RGB24 frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Wrap packed RGB24 bytes. The buffer length must match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(FRAME_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))? as usize;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// A frame of one solid colour.
    pub fn filled(size: FrameSize, rgb: [u8; 3]) -> Self {
        let pixels = size.area() as usize;
        let mut data = Vec::with_capacity(pixels * FRAME_CHANNELS as usize);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width: size.width,
            height: size.height,
        }
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    pub fn channels(&self) -> u32 {
        FRAME_CHANNELS
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Paint an axis-aligned rectangle, clipped to the frame.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgb: [u8; 3]) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for row in y.min(self.height)..y_end {
            for col in x.min(self.width)..x_end {
                let offset = ((row * self.width + col) * FRAME_CHANNELS) as usize;
                self.data[offset..offset + 3].copy_from_slice(&rgb);
            }
        }
    }

    /// Single-channel luma copy of this frame.
    pub fn to_luma(&self) -> Result<GrayImage> {
        Ok(imageops::grayscale(&self.rgb_view()?))
    }

    /// Scale to `size`. Returns `self` untouched when already that size.
    pub fn resized(self, size: FrameSize) -> Result<Frame> {
        if self.size() == size {
            return Ok(self);
        }
        let scaled = imageops::resize(
            &self.rgb_view()?,
            size.width,
            size.height,
            FilterType::Triangle,
        );
        Ok(Frame::from_rgb_image(scaled))
    }

    /// Copy of the region starting at `(x, y)` and extending to the frame edges.
    pub fn crop_from(&self, x: u32, y: u32) -> Result<Frame> {
        if x >= self.width || y >= self.height {
            return Err(anyhow!(
                "region of interest origin ({}, {}) lies outside {}x{} frame",
                x,
                y,
                self.width,
                self.height
            ));
        }
        let (width, height) = (self.width - x, self.height - y);
        let stride = (self.width * FRAME_CHANNELS) as usize;
        let row_len = (width * FRAME_CHANNELS) as usize;
        let mut data = Vec::with_capacity(row_len * height as usize);
        for row in y..self.height {
            let start = row as usize * stride + (x * FRAME_CHANNELS) as usize;
            data.extend_from_slice(&self.data[start..start + row_len]);
        }
        Frame::new(data, width, height)
    }

    fn rgb_view(&self) -> Result<ImageBuffer<Rgb<u8>, &[u8]>> {
        ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }
}
