//! Clip upload to the remote clips API.
//!
//! The request body is always buildable; the HTTP transport (`ClipsApi`) is
//! behind the `upload` feature. Wire format of `POST <base>/clips`:
//!
//! ```json
//! {
//!   "dateRecorded": "2024-05-01T12:00:00.000Z",
//!   "data": "<base64 compressed video>",
//!   "detections": [{ "timestamp": 100, "boundingBox": [x, y, w, h] }]
//! }
//! ```
//!
//! `detections` holds one entry per region per frame; `timestamp` is the
//! frame's offset from the clip start in milliseconds.

#[cfg(feature = "upload")]
mod tls;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use url::Url;

use crate::clip::Clip;
use crate::writer::Uploader;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEntry {
    pub timestamp: i64,
    pub bounding_box: [i32; 4],
}

/// Upload metadata of a clip, kept after its frames are released.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipSummary {
    pub date_recorded: DateTime<Utc>,
    pub fps: f64,
    pub frames: usize,
    pub detections: Vec<DetectionEntry>,
}

impl ClipSummary {
    pub fn from_clip(clip: &Clip) -> Self {
        let detections = clip
            .frames()
            .iter()
            .flat_map(|record| {
                let timestamp = record.timestamp_ms(clip.fps);
                record.bounding_boxes().map(move |bbox| DetectionEntry {
                    timestamp,
                    bounding_box: bbox.to_array(),
                })
            })
            .collect();
        Self {
            date_recorded: clip.started_at,
            fps: clip.fps,
            frames: clip.len(),
            detections,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipUpload<'a> {
    pub date_recorded: String,
    pub data: String,
    pub detections: &'a [DetectionEntry],
}

impl<'a> ClipUpload<'a> {
    pub fn new(summary: &'a ClipSummary, video: &[u8]) -> Self {
        Self {
            date_recorded: summary
                .date_recorded
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            data: STANDARD.encode(video),
            detections: &summary.detections,
        }
    }
}

/// `<base>/clips`, keeping any path prefix of `base`.
pub fn clips_endpoint(base: &str) -> Result<Url> {
    let trimmed = base.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("upload base URL is empty"));
    }
    let mut base = Url::parse(trimmed).with_context(|| format!("invalid base URL {}", trimmed))?;
    if base.cannot_be_a_base() {
        return Err(anyhow!("base URL {} cannot carry a path", trimmed));
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("clips").context("build clips endpoint")
}

#[cfg(feature = "upload")]
pub use api::ClipsApi;

#[cfg(feature = "upload")]
mod api {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

    /// HTTP client for the clips API.
    pub struct ClipsApi {
        endpoint: Url,
        agent: ureq::Agent,
    }

    impl ClipsApi {
        pub fn new(base_url: &str, accept_invalid_certs: bool) -> Result<Self> {
            let endpoint = clips_endpoint(base_url)?;
            let mut builder = ureq::AgentBuilder::new().timeout(UPLOAD_TIMEOUT);
            if accept_invalid_certs {
                log::warn!(
                    "TLS certificate validation is DISABLED for uploads to {}",
                    endpoint
                );
                builder = builder.tls_config(super::tls::accept_any_certificate()?);
            }
            Ok(Self {
                endpoint,
                agent: builder.build(),
            })
        }

        pub fn endpoint(&self) -> &Url {
            &self.endpoint
        }
    }

    impl Uploader for ClipsApi {
        fn upload(&self, video: &Path, summary: &ClipSummary) -> Result<()> {
            let bytes =
                std::fs::read(video).with_context(|| format!("read {}", video.display()))?;
            let body = serde_json::to_string(&ClipUpload::new(summary, &bytes))
                .context("encode clip upload")?;
            log::info!(
                "saving clip to API: POST {} ({} bytes, {} detections)",
                self.endpoint,
                bytes.len(),
                summary.detections.len()
            );
            match self
                .agent
                .post(self.endpoint.as_str())
                .set("Content-Type", "application/json")
                .send_string(&body)
            {
                Ok(_) => Ok(()),
                Err(ureq::Error::Status(code, response)) => Err(anyhow!(
                    "clips API answered {} {}",
                    code,
                    response.status_text()
                )),
                Err(err) => Err(anyhow!(err)).context("send clip upload"),
            }
        }
    }
}

/// Uploader for `base_url`, or `None` when uploads are not configured.
pub fn build_uploader(
    base_url: Option<&str>,
    accept_invalid_certs: bool,
) -> Result<Option<Arc<dyn Uploader>>> {
    let Some(base_url) = base_url.filter(|url| !url.trim().is_empty()) else {
        log::info!("API_BASE_URL not set, clips will not be uploaded");
        return Ok(None);
    };
    #[cfg(feature = "upload")]
    {
        let api = ClipsApi::new(base_url, accept_invalid_certs)?;
        log::info!("uploading clips to {}", api.endpoint());
        Ok(Some(Arc::new(api)))
    }
    #[cfg(not(feature = "upload"))]
    {
        let _ = accept_invalid_certs;
        log::warn!(
            "upload to {} requested but built without the upload feature",
            base_url
        );
        Ok(None)
    }
}
