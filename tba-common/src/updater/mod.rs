//! Update pipeline
//!
//! Reacts to a newly recorded submission. Two strategies, chosen by
//! configuration:
//! - [`QueuedUpdater`] hands the entries to the background [`AggregateQueue`],
//!   which increments the summary table and refreshes the cache.
//! - [`SynchronousDegradedUpdater`] only drops the cached snapshot so the
//!   next read recomputes it; the summary table is left to the next rebuild.
//!
//! Neither strategy fails the caller once the ledger write has committed.

mod worker;

pub use worker::{AggregateJob, AggregateQueue, WorkerCounts};

use crate::cache::CacheTier;
use crate::config::UpdateMode;
use crate::db::{AllocationInput, SubmissionKey};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait AggregateUpdater: Send + Sync {
    fn mode(&self) -> UpdateMode;

    /// Called after the ledger has committed a submission
    async fn on_submission_recorded(
        &self,
        submission_key: SubmissionKey,
        entries: &[AllocationInput],
    ) -> Result<()>;

    /// Background queue, if this strategy has one
    fn queue(&self) -> Option<&Arc<AggregateQueue>> {
        None
    }
}

/// Invalidate-only strategy for when no worker is available
#[derive(Debug, Clone)]
pub struct SynchronousDegradedUpdater {
    cache: CacheTier,
}

impl SynchronousDegradedUpdater {
    pub fn new(cache: CacheTier) -> Self {
        Self { cache }
    }

    async fn invalidate(&self, submission_key: SubmissionKey) {
        match self.cache.invalidate().await {
            Ok(()) => debug!(submission_key = %submission_key, "Invalidated aggregate cache"),
            Err(e) => warn!(
                submission_key = %submission_key,
                error = %e,
                "Could not invalidate aggregate cache"
            ),
        }
    }
}

#[async_trait]
impl AggregateUpdater for SynchronousDegradedUpdater {
    fn mode(&self) -> UpdateMode {
        UpdateMode::Synchronous
    }

    async fn on_submission_recorded(
        &self,
        submission_key: SubmissionKey,
        _entries: &[AllocationInput],
    ) -> Result<()> {
        self.invalidate(submission_key).await;
        Ok(())
    }
}

/// Background strategy; degrades to invalidation if the queue is full or gone
pub struct QueuedUpdater {
    queue: Arc<AggregateQueue>,
    fallback: SynchronousDegradedUpdater,
}

impl QueuedUpdater {
    pub fn new(queue: Arc<AggregateQueue>, cache: CacheTier) -> Self {
        Self {
            queue,
            fallback: SynchronousDegradedUpdater::new(cache),
        }
    }
}

#[async_trait]
impl AggregateUpdater for QueuedUpdater {
    fn mode(&self) -> UpdateMode {
        UpdateMode::Queued
    }

    async fn on_submission_recorded(
        &self,
        submission_key: SubmissionKey,
        entries: &[AllocationInput],
    ) -> Result<()> {
        let job = AggregateJob::ApplySubmission {
            submission_key,
            entries: entries.to_vec(),
        };

        if let Err(e) = self.queue.enqueue(job) {
            warn!(
                submission_key = %submission_key,
                error = %e,
                "Aggregate queue not accepting jobs, falling back to cache invalidation"
            );
            self.fallback.invalidate(submission_key).await;
        }
        Ok(())
    }

    fn queue(&self) -> Option<&Arc<AggregateQueue>> {
        Some(&self.queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregates::AggregateReader;
    use crate::cache::{CacheBackend, CacheTtl, MemoryCache};
    use crate::config::{RetryPolicy, UpdaterConfig};
    use crate::db::{AggregateItem, Identity};
    use crate::ledger::LedgerStore;
    use crate::summary::SummaryTable;
    use crate::test_support::{pct, seeded_pool};
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        ledger: LedgerStore,
        summary: SummaryTable,
        cache: CacheTier,
        reader: AggregateReader,
        category_ids: Vec<i64>,
    }

    async fn fixture() -> Fixture {
        fixture_with_cache(CacheTier::new(Arc::new(MemoryCache::new(16)))).await
    }

    async fn fixture_with_cache(cache: CacheTier) -> Fixture {
        let (dir, pool, categories) = seeded_pool().await;
        let ledger = LedgerStore::new(pool.clone());
        let summary = SummaryTable::new(pool);
        let reader = AggregateReader::new(
            ledger.clone(),
            summary.clone(),
            cache.clone(),
            Duration::from_secs(300),
        );
        Fixture {
            _dir: dir,
            ledger,
            summary,
            cache,
            reader,
            category_ids: categories.iter().map(|c| c.id).collect(),
        }
    }

    fn updater_config(workers: usize) -> UpdaterConfig {
        UpdaterConfig {
            mode: UpdateMode::Queued,
            queue_capacity: 16,
            workers,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
            },
            rebuild_interval: None,
        }
    }

    /// Memory cache whose writes take a long time
    struct SlowCache {
        inner: MemoryCache,
        delay: Duration,
    }

    #[async_trait]
    impl CacheBackend for SlowCache {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String, ttl: CacheTtl) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    fn stale_snapshot() -> Vec<AggregateItem> {
        vec![AggregateItem {
            category_name: "Stale".to_string(),
            average: pct("1"),
            color: "#000000".to_string(),
        }]
    }

    async fn record(f: &Fixture, entries: &[AllocationInput]) -> SubmissionKey {
        f.ledger.record_submission(entries, &Identity::anonymous()).await.unwrap()
    }

    #[tokio::test]
    async fn test_degraded_updater_invalidates_only() {
        let f = fixture().await;
        f.cache.set_snapshot(&stale_snapshot(), CacheTtl::Forever).await.unwrap();

        let entries = vec![AllocationInput::new(f.category_ids[0], pct("100"))];
        let key = record(&f, &entries).await;

        let updater = SynchronousDegradedUpdater::new(f.cache.clone());
        updater.on_submission_recorded(key, &entries).await.unwrap();

        assert_eq!(f.cache.get_snapshot().await.unwrap(), None);
        assert!(f.summary.is_empty().await.unwrap());
        assert!(updater.queue().is_none());
    }

    #[tokio::test]
    async fn test_queued_updater_applies_and_refreshes() {
        let f = fixture().await;
        let queue = Arc::new(AggregateQueue::start(
            f.summary.clone(),
            f.reader.clone(),
            &updater_config(1),
        ));
        let updater = QueuedUpdater::new(Arc::clone(&queue), f.cache.clone());

        f.cache.set_snapshot(&stale_snapshot(), CacheTtl::Forever).await.unwrap();
        let (a, b) = (f.category_ids[0], f.category_ids[1]);
        for split in [["10", "90"], ["30", "70"]] {
            let entries = vec![
                AllocationInput::new(a, pct(split[0])),
                AllocationInput::new(b, pct(split[1])),
            ];
            let key = record(&f, &entries).await;
            updater.on_submission_recorded(key, &entries).await.unwrap();
        }

        queue.wait_idle().await;

        let report = f.reader.get_aggregates().await.unwrap();
        assert_eq!(report.items[0].average, pct("20"));
        assert_eq!(report.items[1].average, pct("80"));
        assert_eq!(report.total_submissions, 2);

        let counts = queue.counts();
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.failed, 0);
        assert_eq!(counts.pending, 0);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_shut_down_queue_falls_back_to_invalidation() {
        let f = fixture().await;
        let queue = Arc::new(AggregateQueue::start(
            f.summary.clone(),
            f.reader.clone(),
            &updater_config(1),
        ));
        queue.shutdown().await;
        assert!(!queue.is_running());

        let updater = QueuedUpdater::new(Arc::clone(&queue), f.cache.clone());
        f.cache.set_snapshot(&stale_snapshot(), CacheTtl::Forever).await.unwrap();

        let entries = vec![AllocationInput::new(f.category_ids[0], pct("100"))];
        let key = record(&f, &entries).await;
        updater.on_submission_recorded(key, &entries).await.unwrap();

        assert_eq!(f.cache.get_snapshot().await.unwrap(), None);
        assert!(matches!(
            queue.enqueue(AggregateJob::RefreshCache),
            Err(crate::Error::QueueUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_job_is_counted_and_dropped() {
        let f = fixture().await;
        let queue = AggregateQueue::start(f.summary.clone(), f.reader.clone(), &updater_config(1));

        // Unknown category violates the foreign key; not transient, so no retry
        let job = AggregateJob::ApplySubmission {
            submission_key: SubmissionKey::generate(),
            entries: vec![AllocationInput::new(9999, pct("100"))],
        };
        queue.enqueue(job).unwrap();
        queue.enqueue(AggregateJob::Rebuild).unwrap();
        queue.wait_idle().await;

        let counts = queue.counts();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.retried, 0);
        assert!(f.summary.get(9999).await.unwrap().is_none());

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_jobs() {
        let f = fixture().await;
        let queue = AggregateQueue::start(f.summary.clone(), f.reader.clone(), &updater_config(1));

        for _ in 0..5 {
            let entries = vec![AllocationInput::new(f.category_ids[0], pct("100"))];
            let submission_key = record(&f, &entries).await;
            queue
                .enqueue(AggregateJob::ApplySubmission {
                    submission_key,
                    entries,
                })
                .unwrap();
        }
        queue.shutdown().await;

        let aggregate = f.summary.get(f.category_ids[0]).await.unwrap().unwrap();
        assert_eq!(aggregate.count(), 5);
        assert_eq!(queue.counts().completed, 5);
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_submissions() {
        let f = fixture_with_cache(CacheTier::new(Arc::new(SlowCache {
            inner: MemoryCache::new(16),
            delay: Duration::from_millis(1000),
        })))
        .await;
        let config = UpdaterConfig {
            queue_capacity: 1,
            ..updater_config(1)
        };
        let queue = Arc::new(AggregateQueue::start(f.summary.clone(), f.reader.clone(), &config));
        let updater = QueuedUpdater::new(Arc::clone(&queue), f.cache.clone());

        for _ in 0..4 {
            let entries = vec![AllocationInput::new(f.category_ids[0], pct("100"))];
            let key = record(&f, &entries).await;

            let start = std::time::Instant::now();
            updater.on_submission_recorded(key, &entries).await.unwrap();
            assert!(
                start.elapsed() < Duration::from_millis(500),
                "submission waited {:?} for the queue",
                start.elapsed()
            );
        }

        queue.wait_idle().await;
        // One job in flight plus one buffered; the rest fell back to invalidation
        let applied = f.summary.get(f.category_ids[0]).await.unwrap().unwrap();
        assert!(applied.count() <= 2);
        assert_eq!(queue.counts().pending, 0);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_rebuild_before_increment_counts_submission_once() {
        let f = fixture().await;
        let queue = AggregateQueue::start(f.summary.clone(), f.reader.clone(), &updater_config(1));

        let entries = vec![AllocationInput::new(f.category_ids[0], pct("100"))];
        let submission_key = record(&f, &entries).await;
        queue.enqueue(AggregateJob::Rebuild).unwrap();
        queue
            .enqueue(AggregateJob::ApplySubmission {
                submission_key,
                entries,
            })
            .unwrap();
        queue.shutdown().await;

        let aggregate = f.summary.get(f.category_ids[0]).await.unwrap().unwrap();
        assert_eq!(aggregate.count(), 1);
        assert_eq!(aggregate.total_hundredths(), 10_000);
        assert_eq!(queue.counts().completed, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_enqueue_racing_shutdown_never_strands_jobs() {
        let f = fixture().await;
        let queue = Arc::new(AggregateQueue::start(
            f.summary.clone(),
            f.reader.clone(),
            &updater_config(2),
        ));

        let senders: Vec<_> = (0..32)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.enqueue(AggregateJob::RefreshCache).is_ok() })
            })
            .collect();
        queue.shutdown().await;

        let mut accepted = 0;
        for sender in senders {
            if sender.await.unwrap() {
                accepted += 1;
            }
        }

        // Everything accepted was drained before the workers exited
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .unwrap();
        let counts = queue.counts();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.completed, accepted);
        assert!(queue.enqueue(AggregateJob::RefreshCache).is_err());
    }
}
