use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use motion_clipper::ingest::{MotionSchedule, SyntheticConfig};
use motion_clipper::writer::{ClipEncoder, Compressor};
use motion_clipper::{
    channel, run_capture, spawn_assembler, AssemblerSettings, AssemblerStats, CaptureSettings,
    Clip, ClipAssembler, ClipSink, FrameSize, MotionDetector, RegionFilter, SyntheticSource,
    WriterPool, WriterStages,
};

const SIZE: FrameSize = FrameSize {
    width: 320,
    height: 240,
};

#[derive(Default)]
struct RecordingSink {
    clips: Vec<(PathBuf, usize, usize)>,
}

impl ClipSink for RecordingSink {
    fn dispatch(&mut self, clip: Clip, path: PathBuf) -> Result<()> {
        let motion_frames = clip
            .frames()
            .iter()
            .filter(|record| !record.regions.is_empty())
            .count();
        self.clips.push((path, clip.len(), motion_frames));
        Ok(())
    }
}

fn scene(total_frames: u64, motion: Option<MotionSchedule>) -> SyntheticSource {
    SyntheticSource::new(SyntheticConfig {
        name: "stub://scenario".to_string(),
        size: SIZE,
        fps: Some(10.0),
        total_frames: Some(total_frames),
        motion,
    })
}

/// 40x40 covers just over 2% of a 320x240 frame.
fn block(start_frame: u64, frames: u64) -> Option<MotionSchedule> {
    Some(MotionSchedule {
        start_frame,
        frames,
        block_width: 40,
        block_height: 40,
        step: 8,
    })
}

fn settings() -> AssemblerSettings {
    AssemblerSettings {
        output_dir: PathBuf::from("clips"),
        clip_duration_secs: 1.0,
        ..AssemblerSettings::default()
    }
}

fn run(source: &mut SyntheticSource) -> Result<(AssemblerStats, RecordingSink)> {
    let (sender, receiver) = channel(1_000);
    run_capture(
        source,
        &mut MotionDetector::default(),
        &RegionFilter::default(),
        sender,
        &CaptureSettings::default(),
        &AtomicBool::new(false),
    )?;
    let mut assembler = ClipAssembler::new(settings(), RecordingSink::default());
    let stats = assembler.run(&receiver);
    Ok((stats, assembler.into_sink()))
}

#[test]
fn static_scene_writes_nothing() -> Result<()> {
    let (stats, sink) = run(&mut scene(5, None))?;
    assert_eq!(stats.frames_seen, 5);
    assert_eq!(stats.clips_started, 0);
    assert!(sink.clips.is_empty());
    Ok(())
}

#[test]
fn ten_motion_frames_complete_one_clip() -> Result<()> {
    let (stats, sink) = run(&mut scene(11, block(1, 10)))?;
    assert_eq!(stats.clips_started, 1);
    assert_eq!(stats.clips_completed, 1);
    assert_eq!(stats.clips_flushed, 0);
    assert_eq!(sink.clips, vec![(PathBuf::from("clips/11.avi"), 10, 10)]);
    Ok(())
}

#[test]
fn clip_outlives_short_motion() -> Result<()> {
    let (stats, sink) = run(&mut scene(30, block(1, 3)))?;
    assert_eq!(stats.clips_started, 1);
    assert_eq!(sink.clips.len(), 1);
    let (path, frames, motion_frames) = &sink.clips[0];
    assert_eq!(path, &PathBuf::from("clips/11.avi"));
    assert_eq!(*frames, 10);
    assert!(*motion_frames >= 3, "motion frames {}", motion_frames);
    Ok(())
}

#[test]
fn single_motion_frame_is_flushed_at_end() -> Result<()> {
    let (stats, sink) = run(&mut scene(2, block(1, 1)))?;
    assert_eq!(stats.clips_completed, 0);
    assert_eq!(stats.clips_flushed, 1);
    assert_eq!(sink.clips, vec![(PathBuf::from("clips/2_clip.avi"), 1, 1)]);
    Ok(())
}

struct BytesEncoder;

impl ClipEncoder for BytesEncoder {
    fn encode(&self, clip: &Clip, path: &Path) -> Result<()> {
        let bytes: Vec<u8> = clip
            .frames()
            .iter()
            .flat_map(|record| record.frame.as_bytes().iter().copied())
            .collect();
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

struct CopyCompressor;

impl Compressor for CopyCompressor {
    fn compress(&self, raw: &Path) -> Result<PathBuf> {
        let out = raw.with_extension("mp4");
        std::fs::copy(raw, &out)?;
        Ok(out)
    }
}

#[test]
fn threaded_pipeline_writes_through_pool() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pool = WriterPool::new(WriterStages {
        encoder: Arc::new(BytesEncoder),
        compressor: Arc::new(CopyCompressor),
        uploader: None,
        keep_compressed: true,
    });
    let (sender, receiver) = channel(1_000);
    let assembler = spawn_assembler(
        AssemblerSettings {
            output_dir: dir.path().to_path_buf(),
            ..settings()
        },
        pool,
        receiver,
    )?;

    let capture = run_capture(
        &mut scene(25, block(1, 12)),
        &mut MotionDetector::default(),
        &RegionFilter::default(),
        sender,
        &CaptureSettings::default(),
        &AtomicBool::new(false),
    )?;
    assert_eq!(capture.frames_sent, 25);

    let (stats, mut pool) = assembler.join()?;
    let reports = pool.drain();
    assert_eq!(stats.clips_completed, 2);
    assert_eq!(reports.len(), 2);
    for report in &reports {
        report.result.as_ref().map_err(|e| anyhow!("{:#}", e))?;
    }

    let frame_bytes = (SIZE.width * SIZE.height * 3) as u64;
    for name in ["11.mp4", "21.mp4"] {
        let meta = std::fs::metadata(dir.path().join(name))?;
        assert_eq!(meta.len(), frame_bytes * 10);
    }
    assert!(!dir.path().join("11.avi").exists());
    Ok(())
}
