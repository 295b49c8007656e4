use std::fs;

use async_trait::async_trait;
use tokio::task;

use crate::{
    browser_controller::PageRenderer,
    capture::ScrollCapture,
    pool::JobRunner,
    retry::{retry_with_backoff, RetryPolicy},
    types::{CaptureError, CaptureJob, CaptureResult, CaptureSuccess, SnapshotError},
};

/// Render + capture as one retried unit, each attempt on its own blocking
/// thread with its own browser session.
#[derive(Clone)]
pub struct Snapshotter {
    renderer: PageRenderer,
    retry: RetryPolicy,
}

impl Snapshotter {
    pub fn new(renderer: PageRenderer, retry: RetryPolicy) -> Self {
        Snapshotter { renderer, retry }
    }

    /// A single attempt. The session is dropped, closing the browser,
    /// before this returns.
    pub fn capture_once(
        renderer: &PageRenderer,
        job: &CaptureJob,
    ) -> Result<CaptureSuccess, SnapshotError> {
        let mut session = renderer.render(&job.url)?;

        let output_folder = job.output_root.join(session.page_title());
        fs::create_dir_all(&output_folder).map_err(|source| CaptureError::Io {
            path: output_folder.clone(),
            source,
        })?;

        let strategy = ScrollCapture::new(job.min_snapshots, job.max_snapshots, job.scroll_pause);
        let snapshot_count = strategy.capture(&mut session, &output_folder)?;

        Ok(CaptureSuccess {
            url: job.url.clone(),
            snapshot_count,
            output_folder,
        })
    }

    pub async fn capture(&self, job: &CaptureJob) -> Result<CaptureSuccess, SnapshotError> {
        retry_with_backoff(&self.retry, &job.url, || {
            let renderer = self.renderer.clone();
            let job = job.clone();
            async move {
                match task::spawn_blocking(move || Self::capture_once(&renderer, &job)).await {
                    Ok(res) => res,
                    Err(e) => Err(SnapshotError::Worker(format!(
                        "capture thread failed: {}",
                        e
                    ))),
                }
            }
        })
        .await
    }
}

#[async_trait]
impl JobRunner for Snapshotter {
    async fn run(&self, job: CaptureJob) -> CaptureResult {
        info!("capturing {} (up to {} attempts)", job.url, self.retry.attempts());
        match self.capture(&job).await {
            Ok(success) => CaptureResult::Captured(success),
            Err(error) => CaptureResult::Failed {
                url: job.url,
                error,
            },
        }
    }
}
