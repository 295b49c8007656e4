use std::{path::PathBuf, time::Duration};

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("accessibility_check_failed: {url}: {reason}")]
    AccessibilityCheckFailed { url: String, reason: String },
    #[error("render: {0}")]
    Render(#[from] RenderError),
    #[error("capture: {0}")]
    Capture(#[from] CaptureError),
    #[error("retries_exhausted: {url} failed {attempts} times, last error: {last}")]
    RetriesExhausted {
        url: String,
        attempts: usize,
        last: Box<SnapshotError>,
    },
    #[error("rate_limit_exceeded: {domain}, next slot in {retry_after:?}")]
    RateLimitExceeded { domain: String, retry_after: Duration },
    #[error("worker: {0}")]
    Worker(String),
    #[error("early_termination")]
    EarlyTermination,
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("browser launch failed: {0}")]
    BrowserLaunch(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("{url} not ready after {waited:?}")]
    ReadinessTimeout { url: String, waited: Duration },
    #[error("script evaluation failed: {reason}")]
    Script { reason: String },
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("could not measure page: {0}")]
    Measure(String),
    #[error("screenshot failed: {0}")]
    Screenshot(String),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("could not write {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("viewport height must be positive")]
    InvalidViewport,
}

/// One URL to capture, immutable once submitted to the pool.
#[derive(Debug, Clone)]
pub struct CaptureJob {
    pub url: String,
    pub output_root: PathBuf,
    pub scroll_pause: Duration,
    pub min_snapshots: usize,
    pub max_snapshots: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureSuccess {
    pub url: String,
    pub snapshot_count: usize,
    pub output_folder: PathBuf,
}

#[derive(Debug)]
pub enum CaptureResult {
    Captured(CaptureSuccess),
    Failed { url: String, error: SnapshotError },
}

impl CaptureResult {
    pub fn url(&self) -> &str {
        match self {
            CaptureResult::Captured(s) => &s.url,
            CaptureResult::Failed { url, .. } => url,
        }
    }

    pub fn is_captured(&self) -> bool {
        matches!(self, CaptureResult::Captured(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedPage {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub total_urls: usize,
    pub captured: Vec<CaptureSuccess>,
    pub failed: Vec<FailedPage>,
    pub skipped: Vec<String>,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn new(started_at: String, total_urls: usize) -> Self {
        RunSummary {
            started_at,
            total_urls,
            captured: vec![],
            failed: vec![],
            skipped: vec![],
            elapsed_secs: 0.0,
        }
    }

    pub fn record(&mut self, result: CaptureResult) {
        match result {
            CaptureResult::Captured(s) => self.captured.push(s),
            CaptureResult::Failed { url, error } => self.failed.push(FailedPage {
                url,
                error: error.to_string(),
            }),
        }
    }

    pub fn unsubmitted(&self) -> usize {
        self.total_urls
            .saturating_sub(self.captured.len() + self.failed.len() + self.skipped.len())
    }
}
