//! compress_clip - re-encode a clip file with libx264

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use motion_clipper::writer::ffmpeg::DEFAULT_FFMPEG;
use motion_clipper::writer::{CompressionLevel, Compressor, FfmpegCompressor};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Clip file to compress. The output is written beside it as .mp4.
    file: PathBuf,
    /// Compression level: h (smallest), m, or l (best quality).
    #[arg(short = 'c', default_value = "m", value_parser = ["h", "m", "l"])]
    level: String,
    /// Explicit x264 CRF; overrides the level.
    #[arg(long)]
    crf: Option<u8>,
    /// FFmpeg binary.
    #[arg(long, env = "MOTION_CLIP_FFMPEG", default_value = DEFAULT_FFMPEG)]
    ffmpeg: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let crf = args
        .crf
        .unwrap_or_else(|| CompressionLevel::from_code(&args.level).crf());
    let compressor = FfmpegCompressor::new(&args.ffmpeg, crf);
    log::info!("compressing {} (crf {})", args.file.display(), crf);
    let output = compressor.compress(&args.file)?;
    println!("{}", output.display());
    Ok(())
}
