//! clipd - motion-triggered clip capture daemon
//!
//! This daemon:
//! 1. Opens a frame source (capture device by index, local file, or stub://)
//! 2. Runs motion detection on every frame in the capture context
//! 3. Assembles motion episodes into fixed-length clips on a second thread
//! 4. Encodes, compresses, and optionally uploads each clip on its own thread
//! 5. On Ctrl-C or end of input, flushes the open clip and waits for writers

use anyhow::{anyhow, Context, Result};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use motion_clipper::writer::{FfmpegCompressor, FfmpegEncoder};
use motion_clipper::{
    channel, open_source, run_capture, spawn_assembler, upload, ClipdConfig, MotionDetector,
    SourceSpec, WriterPool, WriterStages,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(group(ArgGroup::new("source").required(true).args(["device", "file"])))]
struct Args {
    /// Capture device index (/dev/video<N>).
    #[arg(long, short = 'd')]
    device: Option<u32>,
    /// Video file to process, or stub://<name> for a synthetic scene.
    #[arg(long, short = 'f')]
    file: Option<String>,
    /// Directory clips are written to (overrides config and environment).
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

impl Args {
    fn source_spec(&self) -> Result<SourceSpec> {
        match (&self.file, self.device) {
            (Some(path), None) => Ok(SourceSpec::File(path.clone())),
            (None, Some(index)) => Ok(SourceSpec::Device(index)),
            _ => Err(anyhow!("exactly one of --device or --file is required")),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = ClipdConfig::load()?;
    if let Some(dir) = args.output_dir.clone() {
        cfg.clips.output_dir = dir;
    }
    std::fs::create_dir_all(&cfg.clips.output_dir).with_context(|| {
        format!(
            "create output directory {}",
            cfg.clips.output_dir.display()
        )
    })?;

    let spec = args.source_spec()?;
    let mut source = open_source(&spec).with_context(|| format!("open {}", spec))?;

    let uploader = upload::build_uploader(
        cfg.upload.base_url.as_deref(),
        cfg.upload.accept_invalid_certs,
    )?;
    if uploader.is_none() && !cfg.encoder.keep_compressed {
        log::warn!("uploads disabled and keep_compressed=false: clips are not retained");
    }
    let mut compressor = FfmpegCompressor::new(&cfg.encoder.ffmpeg_bin, cfg.encoder.effective_crf());
    compressor.preset = cfg.encoder.preset.clone();
    let pool = WriterPool::new(WriterStages {
        encoder: Arc::new(FfmpegEncoder::new(&cfg.encoder.ffmpeg_bin)),
        compressor: Arc::new(compressor),
        uploader,
        keep_compressed: cfg.encoder.keep_compressed,
    });

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .context("install Ctrl-C handler")?;
    }

    let (sender, receiver) = channel(cfg.capture.max_outstanding_messages);
    let assembler = spawn_assembler(cfg.clips.assembler_settings(), pool, receiver)?;

    log::info!(
        "clipd running: {} -> {} ({}s clips, min area {:.2}%)",
        spec,
        cfg.clips.output_dir.display(),
        cfg.clips.duration_secs,
        cfg.detector.filter.min_relative_area * 100.0
    );

    let mut detector = MotionDetector::new(cfg.detector.motion.clone());
    let capture = run_capture(
        &mut source,
        &mut detector,
        &cfg.detector.filter,
        sender,
        &cfg.capture.settings,
        &stop,
    );

    let (stats, mut pool) = assembler.join()?;
    let reports = pool.drain();
    let failed = reports.iter().filter(|r| r.result.is_err()).count();
    log::info!(
        "clipd stopped: frames={} clips={} (completed={} flushed={}) writer_failures={}",
        stats.frames_seen,
        stats.clips_completed + stats.clips_flushed,
        stats.clips_completed,
        stats.clips_flushed,
        failed
    );

    let capture = capture?;
    log::info!(
        "capture: read={} with_motion={} detector_errors={}",
        capture.frames_read,
        capture.frames_with_motion,
        capture.detector_errors
    );
    Ok(())
}
