//! Background aggregate queue
//!
//! A bounded channel feeding a fixed pool of tokio worker tasks. Workers
//! share the receiver; each job runs under the configured retry policy and a
//! job that still fails is logged, counted and dropped. Enqueueing never
//! waits: a full or closed queue is reported to the caller immediately.

use crate::aggregates::AggregateReader;
use crate::config::{RetryPolicy, UpdaterConfig};
use crate::db::{retry_on_lock, AllocationInput, SubmissionKey};
use crate::summary::SummaryTable;
use crate::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Work item for the aggregate workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateJob {
    /// Add one submission's entries to the summary table, then refresh the cache
    ApplySubmission {
        submission_key: SubmissionKey,
        entries: Vec<AllocationInput>,
    },
    /// Recompute the cached snapshot from the summary table
    RefreshCache,
    /// Rebuild the summary table from the ledger, then refresh the cache
    Rebuild,
}

impl AggregateJob {
    pub fn kind(&self) -> &'static str {
        match self {
            AggregateJob::ApplySubmission { .. } => "apply_submission",
            AggregateJob::RefreshCache => "refresh_cache",
            AggregateJob::Rebuild => "rebuild",
        }
    }
}

/// Point-in-time worker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerCounts {
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub pending: u64,
}

#[derive(Debug, Default)]
struct WorkerStats {
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// Everything a worker needs to run a job
#[derive(Debug, Clone)]
struct JobContext {
    summary: SummaryTable,
    reader: AggregateReader,
    retry: RetryPolicy,
    stats: Arc<WorkerStats>,
}

pub struct AggregateQueue {
    /// Taken on shutdown so no job can land in a channel nobody drains
    sender: std::sync::Mutex<Option<mpsc::Sender<AggregateJob>>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    stats: Arc<WorkerStats>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl AggregateQueue {
    /// Spawn `config.workers` workers on the current tokio runtime
    pub fn start(summary: SummaryTable, reader: AggregateReader, config: &UpdaterConfig) -> Self {
        let workers = config.workers.max(1);
        info!(workers, capacity = config.queue_capacity, "Starting aggregate queue");

        let (sender, receiver) = mpsc::channel::<AggregateJob>(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let cancel = CancellationToken::new();
        let stats = Arc::new(WorkerStats::default());
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        let context = JobContext {
            summary,
            reader,
            retry: config.retry,
            stats: Arc::clone(&stats),
        };

        let mut worker_handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let receiver = Arc::clone(&receiver);
            let context = context.clone();
            let cancel = cancel.clone();
            let pending = Arc::clone(&pending);
            let idle = Arc::clone(&idle);

            worker_handles.push(tokio::spawn(async move {
                aggregate_worker(worker_id, receiver, context, cancel, pending, idle).await;
            }));
        }

        Self {
            sender: std::sync::Mutex::new(Some(sender)),
            worker_handles: Mutex::new(worker_handles),
            cancel,
            stats,
            pending,
            idle,
        }
    }

    /// Hand a job to the workers without waiting for it to run
    ///
    /// Never waits for channel capacity. Fails with
    /// [`Error::QueueUnavailable`] when the queue is full or has been shut
    /// down; the job is not queued in either case.
    pub fn enqueue(&self, job: AggregateJob) -> Result<()> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            return Err(Error::QueueUnavailable("aggregate queue is shut down".to_string()));
        };

        let kind = job.kind();
        self.pending.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(job) {
            Ok(()) => {
                debug!(job = kind, "Enqueued aggregate job");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.finish_pending();
                Err(Error::QueueUnavailable("aggregate queue is full".to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                self.finish_pending();
                Err(Error::QueueUnavailable("aggregate queue is closed".to_string()))
            }
        }
    }

    fn finish_pending(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn counts(&self) -> WorkerCounts {
        WorkerCounts {
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            retried: self.stats.retried.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::SeqCst) as u64,
        }
    }

    /// Resolve once every enqueued job has finished (succeeded or failed)
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting jobs, let workers drain what is queued, and wait for them
    pub async fn shutdown(&self) {
        // Closing under the lock orders every enqueue before or after shutdown
        drop(self.sender.lock().unwrap_or_else(PoisonError::into_inner).take());
        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.worker_handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Aggregate worker ended abnormally");
            }
        }

        info!(counts = ?self.counts(), "Aggregate queue shut down");
    }
}

async fn aggregate_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<AggregateJob>>>,
    context: JobContext,
    cancel: CancellationToken,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
) {
    debug!(worker_id, "Aggregate worker started");

    loop {
        let job = {
            let mut rx = receiver.lock().await;
            if cancel.is_cancelled() {
                rx.try_recv().ok()
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => rx.try_recv().ok(),
                    job = rx.recv() => job,
                }
            }
        };

        let Some(job) = job else {
            debug!(worker_id, "Aggregate worker shutting down");
            break;
        };

        let kind = job.kind();
        let start = Instant::now();
        match run_job(&context, job).await {
            Ok(()) => {
                context.stats.completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    worker_id,
                    job = kind,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Aggregate job completed"
                );
            }
            Err(e) => {
                context.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker_id,
                    job = kind,
                    error = %e,
                    "Aggregate job failed, dropping; cache stays stale until next rebuild"
                );
            }
        }

        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            idle.notify_waiters();
        }
    }
}

async fn run_job(context: &JobContext, job: AggregateJob) -> Result<()> {
    match job {
        AggregateJob::ApplySubmission {
            submission_key,
            entries,
        } => {
            with_retry(context, "apply_submission", || {
                context.summary.apply_submission(&submission_key, &entries)
            })
            .await?;
            refresh(context).await
        }
        AggregateJob::RefreshCache => refresh(context).await,
        AggregateJob::Rebuild => {
            with_retry(context, "rebuild_aggregates", || context.summary.rebuild_from_scratch())
                .await?;
            refresh(context).await
        }
    }
}

/// Refresh the cache; an unreachable cache is not a job failure
async fn refresh(context: &JobContext) -> Result<()> {
    match with_retry(context, "refresh_cache", || context.reader.refresh_cache()).await {
        Err(Error::CacheUnavailable(reason)) => {
            warn!(reason = %reason, "Cache unavailable, snapshot not refreshed");
            Ok(())
        }
        other => other,
    }
}

/// [`retry_on_lock`] that records how many extra attempts were needed
async fn with_retry<F, Fut, T>(context: &JobContext, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let attempts = AtomicU32::new(0);
    let result = retry_on_lock(operation, &context.retry, || {
        attempts.fetch_add(1, Ordering::Relaxed);
        op()
    })
    .await;

    let extra = attempts.load(Ordering::Relaxed).saturating_sub(1);
    if extra > 0 {
        context.stats.retried.fetch_add(u64::from(extra), Ordering::Relaxed);
    }
    result
}
