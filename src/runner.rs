use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::Utc;
use futures::{stream::FuturesUnordered, StreamExt};

use crate::{
    browser_controller::{ChromeDriverFactory, PageRenderer, RenderSettings},
    pool::{DomainWorkerPool, JobRunner},
    prechecker::{AccessibilityChecker, PrecheckOptions},
    rate_limiter::AdaptiveRateLimiter,
    retry::RetryPolicy,
    snapshotter::Snapshotter,
    types::{CaptureJob, CaptureResult, RunSummary},
    utils::OUTPUT_DIRECTORY,
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct RunnerOptions {
    // root under which one folder per page title is created
    #[builder(default = "self.default_output_dir()")]
    output_dir: PathBuf,
    #[builder(default = "2")]
    min_snapshots: usize,
    #[builder(default = "10")]
    max_snapshots: usize,
    // pause after each scroll step
    #[builder(default = "Duration::from_secs(2)")]
    scroll_pause: Duration,
    #[builder(default = "2")]
    max_workers_per_domain: usize,
    // requests per 60s window a new domain starts with
    #[builder(default = "30")]
    default_rate_limit: u32,
    #[builder(default = "Duration::from_secs(30)")]
    page_load_timeout: Duration,
    // attempts per url, first one included
    #[builder(default = "3")]
    retries: usize,
}

impl RunnerOptions {
    pub fn default_builder() -> RunnerOptionsBuilder {
        RunnerOptionsBuilder::default()
    }
}

impl RunnerOptionsBuilder {
    fn default_output_dir(&self) -> PathBuf {
        OUTPUT_DIRECTORY.clone()
    }

    fn validate(&self) -> Result<(), String> {
        let min = self.min_snapshots.unwrap_or(2);
        let max = self.max_snapshots.unwrap_or(10);
        if min == 0 || max == 0 {
            return Err("min_snapshots and max_snapshots must be at least 1".into());
        }
        if min > max {
            return Err(format!(
                "min_snapshots ({}) must not exceed max_snapshots ({})",
                min, max
            ));
        }
        if self.max_workers_per_domain == Some(0) {
            return Err("max_workers_per_domain must be at least 1".into());
        }
        if self.retries == Some(0) {
            return Err("retries must be at least 1".into());
        }
        Ok(())
    }
}

/// Reads a newline separated url list. Blank and `#` lines are ignored.
pub fn read_url_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let content =
        fs::read_to_string(path).context(format!("could not read url list {:?}", path))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect())
}

/// First signal sets `should_terminate` so no new urls are submitted, a
/// second one exits the process right away.
pub fn register_termination_signals(
    signals: &[i32],
    should_terminate: &Arc<AtomicBool>,
) -> std::io::Result<()> {
    for &sig in signals {
        // checked before the flag is set, so it only fires once it already is
        signal_hook::flag::register_conditional_shutdown(sig, 1, Arc::clone(should_terminate))?;
        signal_hook::flag::register(sig, Arc::clone(should_terminate))?;
    }
    Ok(())
}

pub struct Runner {
    options: RunnerOptions,
    checker: AccessibilityChecker,
    pool: DomainWorkerPool,
    should_terminate: Arc<AtomicBool>,
}

impl Runner {
    /// Wires the chrome backed pipeline from `options`.
    pub fn new(options: RunnerOptions, should_terminate: Arc<AtomicBool>) -> anyhow::Result<Self> {
        let limiter = Arc::new(AdaptiveRateLimiter::new(options.default_rate_limit));
        let checker = AccessibilityChecker::new(limiter, PrecheckOptions::default())
            .context("could not instantiate accessibility checker")?;

        let renderer = PageRenderer::new(
            Arc::new(ChromeDriverFactory::default()),
            RenderSettings::with_page_load_timeout(options.page_load_timeout),
        );
        let retry = RetryPolicy::new(
            options.retries,
            Duration::from_secs(4),
            Duration::from_secs(10),
        );
        let snapshotter = Snapshotter::new(renderer, retry);

        Ok(Self::with_components(
            options,
            checker,
            Arc::new(snapshotter),
            should_terminate,
        ))
    }

    pub fn with_components(
        options: RunnerOptions,
        checker: AccessibilityChecker,
        job_runner: Arc<dyn JobRunner>,
        should_terminate: Arc<AtomicBool>,
    ) -> Self {
        let pool = DomainWorkerPool::new(job_runner, options.max_workers_per_domain);
        Runner {
            options,
            checker,
            pool,
            should_terminate,
        }
    }

    fn job_for(&self, url: &str) -> CaptureJob {
        CaptureJob {
            url: url.into(),
            output_root: self.options.output_dir.clone(),
            scroll_pause: self.options.scroll_pause,
            min_snapshots: self.options.min_snapshots,
            max_snapshots: self.options.max_snapshots,
        }
    }

    pub async fn run(&self, urls: &[String]) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::new(Utc::now().to_rfc3339(), urls.len());

        info!(
            "snapshotting {} urls into {:?}, {} workers per domain, snapshots {}..={}",
            urls.len(),
            self.options.output_dir,
            self.options.max_workers_per_domain,
            self.options.min_snapshots,
            self.options.max_snapshots
        );

        let mut pending = FuturesUnordered::new();
        for url in urls {
            if self.should_terminate.load(Ordering::Relaxed) {
                warn!("termination requested, not submitting remaining urls");
                break;
            }
            if !self.checker.is_accessible(url).await {
                warn!("skipping {}, it is not accessible", url);
                summary.skipped.push(url.clone());
                continue;
            }
            debug!("submitting {}", url);
            pending.push(self.pool.submit(self.job_for(url)));
        }

        while let Some(result) = pending.next().await {
            self.report(&result);
            summary.record(result);
        }
        self.pool.shutdown().await;

        let elapsed = started.elapsed();
        summary.elapsed_secs = elapsed.as_secs_f64();
        info!(
            "processed {} urls in {:.2?}: {} captured, {} failed, {} skipped, {} not submitted",
            summary.total_urls,
            elapsed,
            summary.captured.len(),
            summary.failed.len(),
            summary.skipped.len(),
            summary.unsubmitted()
        );
        summary
    }

    fn report(&self, result: &CaptureResult) {
        match result {
            CaptureResult::Captured(s) => {
                info!(
                    "captured {} snapshots of {} into {:?}",
                    s.snapshot_count, s.url, s.output_folder
                );
            }
            CaptureResult::Failed { url, error } => {
                error!("could not capture {}: {}", url, error);
            }
        }
    }
}
