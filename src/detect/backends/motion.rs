//! Background-subtraction motion detector.
//!
//! Each frame is reduced to a blurred luma image and differenced against a
//! reference frame. The difference is cleaned up in fixed stages:
//!
//! 1. low-intensity mask (sensor noise that normalisation would amplify)
//! 2. min-max normalisation to the full intensity range
//! 3. binary threshold
//! 4. morphological close to merge fragments and fill holes
//!
//! External contours of the resulting foreground become candidate regions.

use anyhow::Result;
use image::{imageops, GrayImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::close;
use imageproc::point::Point;
use serde::{Deserialize, Serialize};

use crate::detect::backend::DetectorBackend;
use crate::detect::region::Region;
use crate::frame::Frame;

/// When the reference frame is replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceReset {
    /// Keep the first frame as the baseline for the whole run.
    Never,
    /// Adopt the latest frame after this many consecutive frames without a
    /// significant region, absorbing slow lighting and background drift.
    AfterIdleFrames(u32),
}

impl Default for ReferenceReset {
    fn default() -> Self {
        Self::AfterIdleFrames(600)
    }
}

#[derive(Clone, Debug)]
pub struct MotionConfig {
    /// Difference values below this are zeroed before normalisation.
    pub mask_threshold: u8,
    /// Normalised values above this become foreground.
    pub binary_threshold: u8,
    /// Gaussian sigma of the preprocessing blur (25px kernel equivalent).
    pub blur_sigma: f32,
    /// Half-width of the square closing element (3 = 7x7).
    pub close_radius: u8,
    /// Dilate/erode passes of the close.
    pub close_iterations: u8,
    pub reference_reset: ReferenceReset,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            mask_threshold: 10,
            binary_threshold: 40,
            blur_sigma: 4.1,
            close_radius: 3,
            close_iterations: 2,
            reference_reset: ReferenceReset::default(),
        }
    }
}

pub struct MotionDetector {
    config: MotionConfig,
    reference: Option<GrayImage>,
    latest: Option<GrayImage>,
    idle_frames: u32,
    reference_resets: u64,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            reference: None,
            latest: None,
            idle_frames: 0,
            reference_resets: 0,
        }
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Number of times the baseline has been replaced after idling.
    pub fn reference_resets(&self) -> u64 {
        self.reference_resets
    }

    /// Candidate regions for `frame`. The first call only seeds the reference.
    pub fn solve(&mut self, frame: &Frame) -> Result<Vec<Region>> {
        let preprocessed = self.preprocess(frame)?;

        let Some(reference) = self.reference.as_ref() else {
            self.reference = Some(preprocessed);
            return Ok(Vec::new());
        };

        if reference.dimensions() != preprocessed.dimensions() {
            log::warn!(
                "MotionDetector: frame size changed to {}x{}, reseeding reference",
                frame.width(),
                frame.height()
            );
            self.reference = Some(preprocessed);
            self.idle_frames = 0;
            return Ok(Vec::new());
        }

        let foreground = self.foreground(reference, &preprocessed);
        self.latest = Some(preprocessed);
        Ok(external_regions(&foreground))
    }

    fn preprocess(&self, frame: &Frame) -> Result<GrayImage> {
        let luma = frame.to_luma()?;
        Ok(gaussian_blur_f32(&luma, self.config.blur_sigma))
    }

    fn foreground(&self, reference: &GrayImage, frame: &GrayImage) -> GrayImage {
        let mut diff = absolute_difference(reference, frame);
        mask_low(&mut diff, self.config.mask_threshold);
        normalize_min_max(&mut diff);
        binarize(&mut diff, self.config.binary_threshold);
        let radius = self
            .config
            .close_radius
            .saturating_mul(self.config.close_iterations.max(1));
        close(&diff, Norm::LInf, radius)
    }

    fn record_outcome(&mut self, retained: usize) {
        let ReferenceReset::AfterIdleFrames(limit) = self.config.reference_reset else {
            return;
        };
        if retained > 0 {
            self.idle_frames = 0;
            return;
        }
        self.idle_frames += 1;
        if self.idle_frames < limit.max(1) {
            return;
        }
        if let Some(latest) = self.latest.take() {
            self.reference = Some(latest);
            self.reference_resets += 1;
            log::debug!(
                "MotionDetector: reference frame refreshed after {} idle frames",
                self.idle_frames
            );
        }
        self.idle_frames = 0;
    }
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new(MotionConfig::default())
    }
}

impl DetectorBackend for MotionDetector {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Region>> {
        self.solve(frame)
    }

    fn observe_filtered(&mut self, retained: usize) {
        self.record_outcome(retained);
    }
}

fn absolute_difference(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let mut out = GrayImage::new(a.width(), a.height());
    for ((dst, pa), pb) in out.pixels_mut().zip(a.pixels()).zip(b.pixels()) {
        dst[0] = pa[0].abs_diff(pb[0]);
    }
    out
}

fn mask_low(image: &mut GrayImage, threshold: u8) {
    for p in image.pixels_mut() {
        if p[0] < threshold {
            p[0] = 0;
        }
    }
}

/// Stretch values to 0..=255. A flat image becomes all zero.
fn normalize_min_max(image: &mut GrayImage) {
    let (mut min, mut max) = (u8::MAX, u8::MIN);
    for p in image.pixels() {
        min = min.min(p[0]);
        max = max.max(p[0]);
    }
    if max <= min {
        for p in image.pixels_mut() {
            p[0] = 0;
        }
        return;
    }
    let scale = 255.0 / (max - min) as f32;
    for p in image.pixels_mut() {
        p[0] = ((p[0] - min) as f32 * scale).round().min(255.0) as u8;
    }
}

fn binarize(image: &mut GrayImage, threshold: u8) {
    for p in image.pixels_mut() {
        p[0] = if p[0] > threshold { 255 } else { 0 };
    }
}

/// Outermost blobs only; holes and blobs nested inside holes are skipped.
fn external_regions(foreground: &GrayImage) -> Vec<Region> {
    // Contour tracing mislabels blobs touching the image border, so trace on a
    // copy framed by one background pixel and shift the points back.
    let mut padded = GrayImage::new(foreground.width() + 2, foreground.height() + 2);
    imageops::replace(&mut padded, foreground, 1, 1);
    find_contours::<i32>(&padded)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(|c| {
            let points = c
                .points
                .into_iter()
                .map(|p| Point::new(p.x - 1, p.y - 1))
                .collect();
            Region::from_contour(points)
        })
        .collect()
}
