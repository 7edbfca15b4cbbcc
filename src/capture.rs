//! Capture context: source → detector → channel.
//!
//! `run_capture` owns the producer half of the channel. It announces the
//! stream once, then for every frame read:
//! - resizes to the processing size (width capped, aspect kept)
//! - runs the detector on the region of interest
//! - filters regions by relative area and re-bases them into frame space
//! - forwards the frame and its regions to the assembly context
//!
//! The loop ends when the source is exhausted, a read fails, or the stop flag
//! is raised. `End` is always sent before returning.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::channel::{ChannelError, FrameSender, StreamInfo};
use crate::detect::{DetectorBackend, Region, RegionFilter, RoiOffset};
use crate::frame::{Frame, FrameSize, MAX_PROCESSING_WIDTH};
use crate::ingest::{resolve_fps, FrameSource, FPS_PROBE_FRAMES};

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub max_processing_width: u32,
    /// Top-left corner of the area the detector looks at.
    pub roi: RoiOffset,
    /// Sleep between reads so file sources play back at their frame rate.
    pub pace_to_fps: bool,
    pub fps_probe_frames: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            max_processing_width: MAX_PROCESSING_WIDTH,
            roi: RoiOffset::default(),
            pace_to_fps: false,
            fps_probe_frames: FPS_PROBE_FRAMES,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CaptureStats {
    pub frames_read: u64,
    pub frames_sent: u64,
    /// Frames with at least one significant region.
    pub frames_with_motion: u64,
    pub detector_errors: u64,
    pub stopped: bool,
}

/// Run the capture loop until the stream ends.
///
/// A backlog refusal from the channel is fatal: the consumer is told the
/// stream is over and the error is returned rather than dropping frames.
pub fn run_capture<S, D>(
    source: &mut S,
    detector: &mut D,
    filter: &RegionFilter,
    mut sender: FrameSender,
    settings: &CaptureSettings,
    stop: &AtomicBool,
) -> Result<CaptureStats>
where
    S: FrameSource + ?Sized,
    D: DetectorBackend + ?Sized,
{
    detector.warm_up()?;
    let fps = resolve_fps(source, settings.fps_probe_frames)?;
    let processing_size = source
        .frame_size()
        .processing_size(settings.max_processing_width)?;
    sender
        .stream_info(StreamInfo {
            processing_size,
            fps,
        })
        .context("announce stream")?;
    log::info!(
        "Source: {} ({} -> {}, {:.2} fps, detector={})",
        source.describe(),
        source.frame_size(),
        processing_size,
        fps,
        detector.name()
    );

    let frame_interval = Duration::from_secs_f64(1.0 / fps);
    let mut stats = CaptureStats::default();

    loop {
        if stop.load(Ordering::SeqCst) {
            log::info!("capture stop requested after {} frames", stats.frames_read);
            stats.stopped = true;
            break;
        }
        let started = Instant::now();

        let frame = match source.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("Source: {} exhausted", source.describe());
                break;
            }
            Err(err) => {
                log::warn!("Source: {} read failed, ending stream: {:#}", source.describe(), err);
                break;
            }
        };
        stats.frames_read += 1;

        let frame = frame.resized(processing_size)?;
        let regions = match analyze(detector, filter, &frame, processing_size, settings.roi) {
            Ok(regions) => regions,
            // The open clip lives in the assembly context, which this loop
            // cannot reach; the frame still goes out so clip timing holds.
            Err(err) => {
                stats.detector_errors += 1;
                log::error!("detector failed on frame {}: {:#}", stats.frames_read, err);
                Vec::new()
            }
        };
        if !regions.is_empty() {
            stats.frames_with_motion += 1;
        }

        match sender.detection(frame, regions) {
            Ok(()) => stats.frames_sent += 1,
            Err(err @ ChannelError::Backlog { .. }) => {
                log::error!("capture halted: {}", err);
                if let Err(end_err) = sender.end() {
                    log::warn!("could not signal end of stream: {}", end_err);
                }
                return Err(anyhow!(err)).context("forward detection");
            }
            Err(err) => return Err(anyhow!(err)).context("forward detection"),
        }

        if settings.pace_to_fps {
            if let Some(remaining) = frame_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
    }

    if let Err(err) = sender.end() {
        log::warn!("could not signal end of stream: {}", err);
    }
    log::info!(
        "capture finished: read={} sent={} with_motion={}",
        stats.frames_read,
        stats.frames_sent,
        stats.frames_with_motion
    );
    Ok(stats)
}

/// Significant regions of one processing-size frame, in frame coordinates.
fn analyze<D: DetectorBackend + ?Sized>(
    detector: &mut D,
    filter: &RegionFilter,
    frame: &Frame,
    processing_size: FrameSize,
    roi: RoiOffset,
) -> Result<Vec<Region>> {
    let candidates = if roi.is_identity() {
        detector.detect(frame)?
    } else {
        detector.detect(&frame.crop_from(roi.x, roi.y)?)?
    };
    let retained = filter.filter(candidates, processing_size.area());
    detector.observe_filtered(retained.len());
    Ok(retained.into_iter().map(|r| r.rebase(roi)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{channel, ChannelMessage};
    use crate::ingest::{MotionSchedule, SyntheticConfig, SyntheticSource};
    use imageproc::point::Point;

    const WAIT: Duration = Duration::from_millis(50);

    /// Reports one fixed 20x20 region on every frame.
    struct FixedDetector {
        observed: Vec<usize>,
    }

    impl DetectorBackend for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Region>> {
            let square = vec![
                Point::new(0, 0),
                Point::new(0, 20),
                Point::new(20, 20),
                Point::new(20, 0),
            ];
            Ok(Region::from_contour(square).into_iter().collect())
        }

        fn observe_filtered(&mut self, retained: usize) {
            self.observed.push(retained);
        }
    }

    fn source(frames: u64, size: FrameSize) -> SyntheticSource {
        SyntheticSource::new(SyntheticConfig {
            size,
            total_frames: Some(frames),
            motion: None,
            ..SyntheticConfig::default()
        })
    }

    fn drain(rx: &crate::channel::FrameReceiver) -> Vec<ChannelMessage> {
        std::iter::from_fn(|| rx.receive(WAIT).ok()).collect()
    }

    #[test]
    fn static_scene_streams_frames_without_regions() -> Result<()> {
        let (tx, rx) = channel(64);
        let mut detector = crate::detect::MotionDetector::default();
        let stats = run_capture(
            &mut source(5, FrameSize::new(64, 48)),
            &mut detector,
            &RegionFilter::default(),
            tx,
            &CaptureSettings::default(),
            &AtomicBool::new(false),
        )?;
        assert_eq!(stats.frames_sent, 5);
        assert_eq!(stats.frames_with_motion, 0);

        let messages = drain(&rx);
        assert_eq!(messages.len(), 7);
        assert!(matches!(messages[0], ChannelMessage::StreamInfo(_)));
        assert!(matches!(messages[6], ChannelMessage::End));
        for message in &messages[1..6] {
            match message {
                ChannelMessage::Detection(d) => assert!(d.regions.is_empty()),
                other => panic!("unexpected {}", other.kind()),
            }
        }
        Ok(())
    }

    #[test]
    fn moving_block_is_reported() -> Result<()> {
        let (tx, rx) = channel(64);
        let mut src = SyntheticSource::new(SyntheticConfig {
            size: FrameSize::new(160, 120),
            total_frames: Some(6),
            motion: Some(MotionSchedule {
                start_frame: 1,
                frames: 5,
                block_width: 24,
                block_height: 24,
                step: 6,
            }),
            ..SyntheticConfig::default()
        });
        let stats = run_capture(
            &mut src,
            &mut crate::detect::MotionDetector::default(),
            &RegionFilter::default(),
            tx,
            &CaptureSettings::default(),
            &AtomicBool::new(false),
        )?;
        assert_eq!(stats.frames_with_motion, 5);
        assert_eq!(drain(&rx).len(), 8);
        Ok(())
    }

    #[test]
    fn frames_are_resized_to_processing_width() -> Result<()> {
        let (tx, rx) = channel(64);
        let settings = CaptureSettings {
            max_processing_width: 32,
            ..CaptureSettings::default()
        };
        run_capture(
            &mut source(2, FrameSize::new(64, 48)),
            &mut crate::detect::MotionDetector::default(),
            &RegionFilter::default(),
            tx,
            &settings,
            &AtomicBool::new(false),
        )?;
        let messages = drain(&rx);
        match &messages[0] {
            ChannelMessage::StreamInfo(info) => {
                assert_eq!(info.processing_size, FrameSize::new(32, 24));
                assert_eq!(info.fps, 10.0);
            }
            other => panic!("unexpected {}", other.kind()),
        }
        match &messages[1] {
            ChannelMessage::Detection(d) => assert_eq!(d.frame.size(), FrameSize::new(32, 24)),
            other => panic!("unexpected {}", other.kind()),
        }
        Ok(())
    }

    #[test]
    fn roi_regions_are_rebased_into_frame_space() -> Result<()> {
        let (tx, rx) = channel(64);
        let mut detector = FixedDetector {
            observed: Vec::new(),
        };
        let settings = CaptureSettings {
            roi: RoiOffset::new(10, 5),
            ..CaptureSettings::default()
        };
        run_capture(
            &mut source(1, FrameSize::new(100, 100)),
            &mut detector,
            &RegionFilter::default(),
            tx,
            &settings,
            &AtomicBool::new(false),
        )?;
        assert_eq!(detector.observed, vec![1]);
        let messages = drain(&rx);
        match &messages[1] {
            ChannelMessage::Detection(d) => {
                assert_eq!(d.regions.len(), 1);
                assert_eq!(d.regions[0].bbox.to_array(), [10, 5, 21, 21]);
            }
            other => panic!("unexpected {}", other.kind()),
        }
        Ok(())
    }

    struct FailingDetector;

    impl DetectorBackend for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Region>> {
            Err(anyhow!("solver fault"))
        }
    }

    #[test]
    fn detector_error_forwards_frame_without_regions() -> Result<()> {
        let (tx, rx) = channel(64);
        let stats = run_capture(
            &mut source(3, FrameSize::new(16, 16)),
            &mut FailingDetector,
            &RegionFilter::default(),
            tx,
            &CaptureSettings::default(),
            &AtomicBool::new(false),
        )?;
        assert_eq!(stats.detector_errors, 3);
        assert_eq!(stats.frames_sent, 3);
        let messages = drain(&rx);
        assert_eq!(messages.len(), 5);
        for message in &messages[1..4] {
            match message {
                ChannelMessage::Detection(d) => assert!(d.regions.is_empty()),
                other => panic!("unexpected {}", other.kind()),
            }
        }
        assert!(matches!(messages[4], ChannelMessage::End));
        Ok(())
    }

    #[test]
    fn raised_stop_flag_still_ends_stream() -> Result<()> {
        let (tx, rx) = channel(64);
        let stats = run_capture(
            &mut source(100, FrameSize::new(16, 16)),
            &mut crate::detect::MotionDetector::default(),
            &RegionFilter::default(),
            tx,
            &CaptureSettings::default(),
            &AtomicBool::new(true),
        )?;
        assert!(stats.stopped);
        assert_eq!(stats.frames_read, 0);
        let messages = drain(&rx);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[1], ChannelMessage::End));
        Ok(())
    }

    #[test]
    fn backlog_fails_loudly_and_ends_stream() {
        let (tx, rx) = channel(3);
        let result = run_capture(
            &mut source(10, FrameSize::new(16, 16)),
            &mut crate::detect::MotionDetector::default(),
            &RegionFilter::default(),
            tx,
            &CaptureSettings::default(),
            &AtomicBool::new(false),
        );
        assert!(result.is_err());
        let messages = drain(&rx);
        assert!(matches!(messages.last(), Some(ChannelMessage::End)));
        assert_eq!(messages.len(), 4);
    }
}
