use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    task::{Context, Poll},
};

use async_trait::async_trait;
use tokio::{
    sync::{Notify, Semaphore},
    task::JoinHandle,
};

use crate::{
    types::{CaptureJob, CaptureResult, SnapshotError},
    utils::domain_of,
};

/// Executes one capture job to completion.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: CaptureJob) -> CaptureResult;
}

/// Resolves to the job's `CaptureResult`. A panicking or cancelled job
/// resolves to a `Worker` failure instead of tearing down the caller.
pub struct JobHandle {
    url: String,
    inner: JoinHandle<CaptureResult>,
}

impl Future for JobHandle {
    type Output = CaptureResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(CaptureResult::Failed {
                url: self.url.clone(),
                error: SnapshotError::Worker(e.to_string()),
            }),
            Poll::Pending => Poll::Pending,
        }
    }
}

// decrements the in-flight count however the job task ends
struct InFlight {
    count: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_one();
        }
    }
}

/// Bounded concurrency per host: one executor (a semaphore with
/// `max_workers_per_domain` permits) per domain, created on first use.
pub struct DomainWorkerPool {
    runner: Arc<dyn JobRunner>,
    max_workers_per_domain: usize,
    executors: Mutex<HashMap<String, Arc<Semaphore>>>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    closed: AtomicBool,
}

impl DomainWorkerPool {
    pub fn new(runner: Arc<dyn JobRunner>, max_workers_per_domain: usize) -> Self {
        DomainWorkerPool {
            runner,
            max_workers_per_domain: max_workers_per_domain.max(1),
            executors: Mutex::new(HashMap::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn executor_for(&self, domain: &str) -> Arc<Semaphore> {
        let mut executors = self.executors.lock().unwrap_or_else(PoisonError::into_inner);
        executors
            .entry(domain.to_string())
            .or_insert_with(|| {
                debug!(
                    "creating executor for {} with {} workers",
                    domain, self.max_workers_per_domain
                );
                Arc::new(Semaphore::new(self.max_workers_per_domain))
            })
            .clone()
    }

    pub fn executor_count(&self) -> usize {
        self.executors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn submit(&self, job: CaptureJob) -> JobHandle {
        let url = job.url.clone();

        // counted before `closed` is read, so a concurrent shutdown either
        // waits for this job or this job sees the pool closed
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight {
            count: self.in_flight.clone(),
            idle: self.idle.clone(),
        };

        if self.closed.load(Ordering::SeqCst) {
            drop(guard);
            let u = url.clone();
            return JobHandle {
                url,
                inner: tokio::spawn(async move {
                    CaptureResult::Failed {
                        url: u,
                        error: SnapshotError::EarlyTermination,
                    }
                }),
            };
        }

        let domain = domain_of(&job.url).unwrap_or_default();
        let executor = self.executor_for(&domain);
        let runner = self.runner.clone();

        let inner = tokio::spawn(async move {
            let _guard = guard;
            let _permit = match executor.acquire_owned().await {
                Ok(p) => p,
                Err(e) => {
                    return CaptureResult::Failed {
                        url: job.url,
                        error: SnapshotError::Worker(e.to_string()),
                    }
                }
            };
            debug!("running capture of {} on {} executor", job.url, domain);
            runner.run(job).await
        });

        JobHandle { url, inner }
    }

    /// Stops accepting jobs and waits until every submitted job finished.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            self.idle.notified().await;
        }
        debug!("worker pool drained, {} executors", self.executor_count());
    }
}
