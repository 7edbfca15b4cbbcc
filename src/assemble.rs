//! Clip-assembly context: channel → segmenter → clip sink.
//!
//! `ClipAssembler` consumes the receiver half of the channel and drives one
//! `ClipSegmenter` per stream. Completed clips are dispatched to a `ClipSink`
//! (normally the `WriterPool`) and never written on this thread.
//!
//! Failure handling:
//! - any fault while handling a message flushes the current clip, is logged,
//!   and the loop keeps consuming
//! - `stall_limit` consecutive receive timeouts flush the current clip
//! - `End`, or the producer disappearing without one, flushes and stops

use anyhow::{anyhow, Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::channel::{ChannelError, ChannelMessage, DetectedFrame, FrameReceiver, StreamInfo};
use crate::clip::{Clip, ClipEnding, ClipName, ClipSegmenter};

/// Receives finished clips. Implementations must not block for long; the
/// assembler calls this on its own thread.
pub trait ClipSink {
    fn dispatch(&mut self, clip: Clip, path: PathBuf) -> Result<()>;
}

impl<K: ClipSink + ?Sized> ClipSink for Box<K> {
    fn dispatch(&mut self, clip: Clip, path: PathBuf) -> Result<()> {
        (**self).dispatch(clip, path)
    }
}

#[derive(Clone, Debug)]
pub struct AssemblerSettings {
    pub output_dir: PathBuf,
    /// Extension of the raw clip container.
    pub container_ext: String,
    pub clip_duration_secs: f64,
    pub receive_timeout: Duration,
    /// Consecutive receive timeouts before the current clip is flushed.
    pub stall_limit: u32,
}

impl Default for AssemblerSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("clips"),
            container_ext: "avi".to_string(),
            clip_duration_secs: 10.0,
            receive_timeout: Duration::from_secs(3),
            stall_limit: 10,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Detection messages received.
    pub frames_seen: u64,
    pub clips_started: u64,
    pub clips_completed: u64,
    pub clips_flushed: u64,
    pub processing_faults: u64,
    pub dispatch_failures: u64,
}

pub struct ClipAssembler<K: ClipSink> {
    settings: AssemblerSettings,
    sink: K,
    stream: Option<StreamInfo>,
    segmenter: Option<ClipSegmenter>,
    stalls: u32,
    stats: AssemblerStats,
}

impl<K: ClipSink> ClipAssembler<K> {
    pub fn new(settings: AssemblerSettings, sink: K) -> Self {
        Self {
            settings,
            sink,
            stream: None,
            segmenter: None,
            stalls: 0,
            stats: AssemblerStats::default(),
        }
    }

    pub fn stats(&self) -> &AssemblerStats {
        &self.stats
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    /// Consume messages until the stream ends.
    pub fn run(&mut self, receiver: &FrameReceiver) -> AssemblerStats {
        loop {
            match receiver.receive(self.settings.receive_timeout) {
                Ok(ChannelMessage::End) => {
                    self.flush("end of stream");
                    break;
                }
                Ok(message) => {
                    self.stalls = 0;
                    self.step(message);
                }
                Err(ChannelError::Timeout) => self.on_timeout(),
                Err(ChannelError::Disconnected) => {
                    log::warn!("capture context went away without ending the stream");
                    self.flush("producer disconnected");
                    break;
                }
                Err(err) => {
                    log::error!("unexpected channel error: {}", err);
                    self.flush("channel error");
                    break;
                }
            }
        }
        log::info!(
            "clip assembly finished: frames={} completed={} flushed={} faults={}",
            self.stats.frames_seen,
            self.stats.clips_completed,
            self.stats.clips_flushed,
            self.stats.processing_faults
        );
        self.stats.clone()
    }

    /// Handle one message. Errors and panics become processing faults: the
    /// current clip is flushed and the loop continues.
    fn step(&mut self, message: ChannelMessage) {
        let kind = message.kind();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handle(message)));
        let fault = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("{:#}", err),
            Err(payload) => panic_message(payload.as_ref()),
        };
        self.stats.processing_faults += 1;
        self.flush("processing fault");
        log::error!("processing fault on {} message: {}", kind, fault);
    }

    pub fn handle(&mut self, message: ChannelMessage) -> Result<()> {
        match message {
            ChannelMessage::StreamInfo(info) => self.start_stream(info),
            ChannelMessage::Detection(detected) => self.on_detection(detected),
            ChannelMessage::End => {
                self.flush("end of stream");
                Ok(())
            }
        }
    }

    fn start_stream(&mut self, info: StreamInfo) -> Result<()> {
        if self.stream.is_some() {
            return Err(anyhow!("duplicate stream info"));
        }
        if info.fps.is_nan() || info.fps <= 0.0 {
            return Err(anyhow!("stream reported invalid fps {}", info.fps));
        }
        let segmenter = ClipSegmenter::new(
            info.fps,
            info.processing_size,
            self.settings.clip_duration_secs,
        );
        log::info!(
            "stream started: {} at {:.2} fps, clips of {} frames into {}",
            info.processing_size,
            info.fps,
            segmenter.target_frames(),
            self.settings.output_dir.display()
        );
        self.stream = Some(info);
        self.segmenter = Some(segmenter);
        Ok(())
    }

    fn on_detection(&mut self, detected: DetectedFrame) -> Result<()> {
        self.stats.frames_seen += 1;
        let stream = self
            .stream
            .ok_or_else(|| anyhow!("detection received before stream info"))?;
        if detected.frame.size() != stream.processing_size {
            return Err(anyhow!(
                "frame size {} does not match stream size {}",
                detected.frame.size(),
                stream.processing_size
            ));
        }
        let segmenter = self
            .segmenter
            .as_mut()
            .context("segmenter missing for active stream")?;

        if detected.regions.is_empty() && !segmenter.is_recording() {
            return Ok(());
        }
        if segmenter.try_start() {
            self.stats.clips_started += 1;
            log::info!(
                "motion at frame {}: recording clip ({} regions)",
                self.stats.frames_seen,
                detected.regions.len()
            );
        }
        segmenter.try_add_frame(detected.frame, detected.regions);
        if segmenter.should_complete() {
            let clip = segmenter.complete()?;
            self.dispatch(clip, ClipEnding::Completed);
        }
        Ok(())
    }

    fn on_timeout(&mut self) {
        self.stalls += 1;
        if self.stalls == self.settings.stall_limit.max(1) {
            log::warn!(
                "no frames for {} consecutive receive timeouts",
                self.stalls
            );
            self.flush("stalled producer");
        }
    }

    /// Dispatch the in-progress clip, if it holds any frames.
    pub fn flush(&mut self, reason: &str) {
        let Some(clip) = self.segmenter.as_mut().and_then(|s| s.try_complete()) else {
            return;
        };
        log::info!("flushing partial clip of {} frames ({})", clip.len(), reason);
        self.dispatch(clip, ClipEnding::Flushed);
    }

    fn dispatch(&mut self, clip: Clip, ending: ClipEnding) {
        let name = ClipName::new(self.stats.frames_seen, ending);
        let path = name.path_in(&self.settings.output_dir, &self.settings.container_ext);
        let frames = clip.len();
        match ending {
            ClipEnding::Completed => self.stats.clips_completed += 1,
            ClipEnding::Flushed => self.stats.clips_flushed += 1,
        }
        match self.sink.dispatch(clip, path.clone()) {
            Ok(()) => log::info!("clip dispatched: {} ({} frames)", path.display(), frames),
            Err(err) => {
                self.stats.dispatch_failures += 1;
                log::error!("clip {} could not be dispatched: {:#}", path.display(), err);
            }
        }
    }
}

/// Running assembly context. Joining returns the sink so the caller can
/// drain it.
pub struct AssemblerHandle<K> {
    join: Option<JoinHandle<(AssemblerStats, K)>>,
}

impl<K> AssemblerHandle<K> {
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    pub fn join(mut self) -> Result<(AssemblerStats, K)> {
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("clip assembler already joined"))?;
        join.join()
            .map_err(|_| anyhow!("clip assembler thread panicked"))
    }
}

/// Run a `ClipAssembler` on its own thread until the stream ends.
pub fn spawn_assembler<K>(
    settings: AssemblerSettings,
    sink: K,
    receiver: FrameReceiver,
) -> Result<AssemblerHandle<K>>
where
    K: ClipSink + Send + 'static,
{
    let join = std::thread::Builder::new()
        .name("clip-assembler".to_string())
        .spawn(move || {
            let mut assembler = ClipAssembler::new(settings, sink);
            let stats = assembler.run(&receiver);
            (stats, assembler.into_sink())
        })
        .context("spawn clip assembler")?;
    Ok(AssemblerHandle { join: Some(join) })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panic: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panic: {}", msg)
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use crate::detect::Region;
    use crate::frame::{Frame, FrameSize};
    use imageproc::point::Point;

    const SIZE: FrameSize = FrameSize {
        width: 8,
        height: 8,
    };

    #[derive(Default)]
    struct RecordingSink {
        clips: Vec<(usize, PathBuf)>,
        fail: bool,
    }

    impl ClipSink for RecordingSink {
        fn dispatch(&mut self, clip: Clip, path: PathBuf) -> Result<()> {
            if self.fail {
                return Err(anyhow!("sink offline"));
            }
            self.clips.push((clip.len(), path));
            Ok(())
        }
    }

    fn settings() -> AssemblerSettings {
        AssemblerSettings {
            output_dir: PathBuf::from("out"),
            clip_duration_secs: 1.0,
            receive_timeout: Duration::from_millis(10),
            stall_limit: 3,
            ..AssemblerSettings::default()
        }
    }

    fn info() -> StreamInfo {
        StreamInfo {
            processing_size: SIZE,
            fps: 5.0,
        }
    }

    fn region() -> Region {
        let square = vec![
            Point::new(1, 1),
            Point::new(1, 4),
            Point::new(4, 4),
            Point::new(4, 1),
        ];
        Region::from_contour(square).expect("square contour")
    }

    fn detection(motion: bool) -> ChannelMessage {
        ChannelMessage::Detection(DetectedFrame {
            frame: Frame::filled(SIZE, [0, 0, 0]),
            regions: if motion { vec![region()] } else { Vec::new() },
        })
    }

    fn assembler() -> ClipAssembler<RecordingSink> {
        ClipAssembler::new(settings(), RecordingSink::default())
    }

    #[test]
    fn clip_keeps_growing_after_motion_stops() -> Result<()> {
        let mut asm = assembler();
        asm.handle(ChannelMessage::StreamInfo(info()))?;
        asm.handle(detection(false))?;
        asm.handle(detection(true))?;
        for _ in 0..4 {
            asm.handle(detection(false))?;
        }
        asm.handle(detection(false))?;

        assert_eq!(asm.sink().clips, vec![(5, PathBuf::from("out/6.avi"))]);
        assert_eq!(asm.stats().clips_started, 1);
        Ok(())
    }

    #[test]
    fn continued_motion_starts_one_clip_per_target() -> Result<()> {
        let mut asm = assembler();
        asm.handle(ChannelMessage::StreamInfo(info()))?;
        for _ in 0..12 {
            asm.handle(detection(true))?;
        }
        assert_eq!(asm.stats().clips_started, 3);
        assert_eq!(asm.stats().clips_completed, 2);
        let lens: Vec<usize> = asm.sink().clips.iter().map(|(len, _)| *len).collect();
        assert_eq!(lens, vec![5, 5]);
        Ok(())
    }

    #[test]
    fn end_flushes_partial_clip_with_suffix() {
        let (mut tx, rx) = channel(16);
        tx.stream_info(info()).unwrap();
        tx.detection(Frame::filled(SIZE, [0, 0, 0]), vec![region()])
            .unwrap();
        tx.end().unwrap();

        let mut asm = assembler();
        let stats = asm.run(&rx);
        assert_eq!(stats.clips_flushed, 1);
        assert_eq!(asm.sink().clips, vec![(1, PathBuf::from("out/1_clip.avi"))]);
    }

    #[test]
    fn disconnect_is_treated_as_end() {
        let (mut tx, rx) = channel(16);
        tx.stream_info(info()).unwrap();
        tx.detection(Frame::filled(SIZE, [0, 0, 0]), vec![region()])
            .unwrap();
        drop(tx);

        let mut asm = assembler();
        asm.run(&rx);
        assert_eq!(asm.sink().clips.len(), 1);
    }

    #[test]
    fn stalled_producer_flushes_but_keeps_waiting() {
        let (mut tx, rx) = channel(16);
        tx.stream_info(info()).unwrap();
        tx.detection(Frame::filled(SIZE, [0, 0, 0]), vec![region()])
            .unwrap();

        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            tx.detection(Frame::filled(SIZE, [0, 0, 0]), Vec::new())
                .unwrap();
            tx.end().unwrap();
        });

        let mut asm = assembler();
        let stats = asm.run(&rx);
        producer.join().unwrap();

        assert_eq!(stats.frames_seen, 2);
        assert_eq!(stats.clips_flushed, 1);
        assert_eq!(asm.sink().clips, vec![(1, PathBuf::from("out/1_clip.avi"))]);
    }

    #[test]
    fn mismatched_frame_is_a_fault_that_flushes() {
        let mut asm = assembler();
        asm.step(ChannelMessage::StreamInfo(info()));
        asm.step(detection(true));
        asm.step(ChannelMessage::Detection(DetectedFrame {
            frame: Frame::filled(FrameSize::new(4, 4), [0, 0, 0]),
            regions: Vec::new(),
        }));

        assert_eq!(asm.stats().processing_faults, 1);
        assert_eq!(asm.sink().clips, vec![(1, PathBuf::from("out/2_clip.avi"))]);

        asm.step(detection(true));
        assert!(asm.segmenter.as_ref().is_some_and(|s| s.is_recording()));
    }

    #[test]
    fn protocol_violations_are_faults() {
        let mut asm = assembler();
        asm.step(detection(true));
        asm.step(ChannelMessage::StreamInfo(info()));
        asm.step(ChannelMessage::StreamInfo(info()));
        assert_eq!(asm.stats().processing_faults, 2);
        assert!(asm.sink().clips.is_empty());
    }

    #[test]
    fn sink_failure_does_not_stop_assembly() -> Result<()> {
        let mut asm = ClipAssembler::new(
            settings(),
            RecordingSink {
                fail: true,
                ..RecordingSink::default()
            },
        );
        asm.handle(ChannelMessage::StreamInfo(info()))?;
        for _ in 0..5 {
            asm.handle(detection(true))?;
        }
        assert_eq!(asm.stats().dispatch_failures, 1);
        asm.handle(detection(true))?;
        assert_eq!(asm.stats().clips_started, 2);
        Ok(())
    }
}
