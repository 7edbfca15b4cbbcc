//! Clip writer pool.
//!
//! Every dispatched clip runs as its own job on a dedicated thread:
//! 1. encode the frames into the raw container at the clip's frame rate
//! 2. compress the raw file (H.264 `.mp4`)
//! 3. upload the compressed file with its detection summary, if configured
//! 4. delete the raw file, and the compressed one unless it is kept
//!
//! A failed encode or compression ends the job with an error and leaves the
//! raw file on disk. Upload failures are logged and cleanup still runs.
//! `WriterPool` keeps the job handles so the number of jobs in flight is
//! observable and shutdown can wait for all of them.

pub mod ffmpeg;

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::assemble::ClipSink;
use crate::clip::Clip;
use crate::upload::ClipSummary;

pub use ffmpeg::{CompressionLevel, FfmpegCompressor, FfmpegEncoder};

/// Serializes a clip's frames into a playable video file.
pub trait ClipEncoder: Send + Sync {
    fn encode(&self, clip: &Clip, path: &Path) -> Result<()>;
}

/// Produces a compressed copy of a raw clip file and returns its path.
pub trait Compressor: Send + Sync {
    fn compress(&self, raw: &Path) -> Result<PathBuf>;
}

/// Sends a compressed clip and its detection summary to a remote store.
pub trait Uploader: Send + Sync {
    fn upload(&self, video: &Path, summary: &ClipSummary) -> Result<()>;
}

/// The stages every job runs through.
#[derive(Clone)]
pub struct WriterStages {
    pub encoder: Arc<dyn ClipEncoder>,
    pub compressor: Arc<dyn Compressor>,
    pub uploader: Option<Arc<dyn Uploader>>,
    /// Leave the compressed file in the output directory after the job.
    pub keep_compressed: bool,
}

/// What a finished job did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOutcome {
    pub raw_path: PathBuf,
    pub compressed_path: PathBuf,
    pub frames: usize,
    pub uploaded: bool,
    pub kept_compressed: bool,
}

#[derive(Debug)]
pub struct JobReport {
    pub path: PathBuf,
    pub result: Result<JobOutcome>,
}

struct WriterJob {
    path: PathBuf,
    handle: JoinHandle<Result<JobOutcome>>,
}

pub struct WriterPool {
    stages: Arc<WriterStages>,
    jobs: Vec<WriterJob>,
    finished: Vec<JobReport>,
    submitted: u64,
}

impl WriterPool {
    pub fn new(stages: WriterStages) -> Self {
        Self {
            stages: Arc::new(stages),
            jobs: Vec::new(),
            finished: Vec::new(),
            submitted: 0,
        }
    }

    /// Start a job for `clip`. Returns once the job thread is running.
    pub fn submit(&mut self, clip: Clip, path: PathBuf) -> Result<()> {
        self.collect_finished();
        let stages = Arc::clone(&self.stages);
        let job_path = path.clone();
        let handle = std::thread::Builder::new()
            .name(format!("clip-writer-{}", self.submitted))
            .spawn(move || run_job(&stages, clip, &job_path))
            .with_context(|| format!("spawn writer for {}", path.display()))?;
        self.submitted += 1;
        self.jobs.push(WriterJob { path, handle });
        Ok(())
    }

    /// Jobs whose thread has not finished yet.
    pub fn in_flight(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| !job.handle.is_finished())
            .count()
    }

    /// Jobs started since the pool was created.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Reports of jobs that have finished, without waiting for the rest.
    /// Each report is returned once, here or from `drain`.
    pub fn reap(&mut self) -> Vec<JobReport> {
        self.collect_finished();
        std::mem::take(&mut self.finished)
    }

    /// Wait for every job. Called at shutdown so no clip is abandoned mid-write.
    /// Returns every report not already handed out by `reap`.
    pub fn drain(&mut self) -> Vec<JobReport> {
        if !self.jobs.is_empty() {
            log::info!("waiting for {} clip writer job(s)", self.jobs.len());
        }
        let mut reports = std::mem::take(&mut self.finished);
        reports.extend(std::mem::take(&mut self.jobs).into_iter().map(join_job));
        reports
    }

    /// Join finished job threads, keeping their reports for `reap`/`drain`.
    fn collect_finished(&mut self) {
        let (done, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|job| job.handle.is_finished());
        self.jobs = running;
        self.finished.extend(done.into_iter().map(join_job));
    }
}

impl ClipSink for WriterPool {
    fn dispatch(&mut self, clip: Clip, path: PathBuf) -> Result<()> {
        self.submit(clip, path)
    }
}

fn join_job(job: WriterJob) -> JobReport {
    let result = match job.handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("clip writer thread panicked")),
    };
    if let Err(err) = &result {
        log::error!("clip {} failed: {:#}", job.path.display(), err);
    }
    JobReport {
        path: job.path,
        result,
    }
}

fn run_job(stages: &WriterStages, clip: Clip, raw_path: &Path) -> Result<JobOutcome> {
    let frames = clip.len();
    if let Some(dir) = raw_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create output directory {}", dir.display()))?;
    }
    stages
        .encoder
        .encode(&clip, raw_path)
        .with_context(|| format!("write clip {}", raw_path.display()))?;
    let summary = ClipSummary::from_clip(&clip);
    drop(clip);
    log::info!("clip written: {} ({} frames)", raw_path.display(), frames);

    let compressed_path = stages
        .compressor
        .compress(raw_path)
        .with_context(|| format!("compress clip {}", raw_path.display()))?;
    log::info!("clip compressed: {}", compressed_path.display());

    let uploaded = match &stages.uploader {
        Some(uploader) => match uploader.upload(&compressed_path, &summary) {
            Ok(()) => {
                log::info!("clip uploaded: {}", compressed_path.display());
                true
            }
            Err(err) => {
                log::error!("upload of {} failed: {:#}", compressed_path.display(), err);
                false
            }
        },
        None => {
            log::info!(
                "no upload endpoint configured, {} will not be uploaded",
                compressed_path.display()
            );
            false
        }
    };

    remove_artifact(raw_path);
    if !stages.keep_compressed {
        remove_artifact(&compressed_path);
    }

    Ok(JobOutcome {
        raw_path: raw_path.to_path_buf(),
        compressed_path,
        frames,
        uploaded,
        kept_compressed: stages.keep_compressed,
    })
}

fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("removed {}", path.display()),
        Err(err) => log::warn!("could not remove {}: {}", path.display(), err),
    }
}
