//! Allocation service facade
//!
//! Entry points used by the HTTP layer and the admin CLI. Wires the ledger,
//! summary table, cache tier, read pipeline and the configured update
//! strategy together.

use crate::aggregates::AggregateReader;
use crate::cache::CacheTier;
use crate::categories;
use crate::config::{AppConfig, UpdateMode, UpdaterConfig};
use crate::db::{
    init_database_with, AggregateReport, AllocationInput, Category, Identity, SubmissionHistory,
    SubmissionKey,
};
use crate::ledger::LedgerStore;
use crate::summary::SummaryTable;
use crate::updater::{
    AggregateJob, AggregateQueue, AggregateUpdater, QueuedUpdater, SynchronousDegradedUpdater,
    WorkerCounts,
};
use crate::{Error, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct AllocationService {
    db: SqlitePool,
    ledger: LedgerStore,
    summary: SummaryTable,
    reader: AggregateReader,
    updater: Arc<dyn AggregateUpdater>,
    cancel: CancellationToken,
}

impl AllocationService {
    /// Assemble the service over an initialized database
    ///
    /// In queued mode this spawns the aggregate workers, so it must be
    /// called from within a tokio runtime.
    pub fn new(
        db: SqlitePool,
        cache: CacheTier,
        updater_config: &UpdaterConfig,
        fallback_ttl: Duration,
    ) -> Self {
        let ledger = LedgerStore::new(db.clone());
        let summary = SummaryTable::new(db.clone());
        let reader = AggregateReader::new(ledger.clone(), summary.clone(), cache.clone(), fallback_ttl);

        let updater: Arc<dyn AggregateUpdater> = match updater_config.mode {
            UpdateMode::Queued => {
                let queue = AggregateQueue::start(summary.clone(), reader.clone(), updater_config);
                Arc::new(QueuedUpdater::new(Arc::new(queue), cache.clone()))
            }
            UpdateMode::Synchronous => Arc::new(SynchronousDegradedUpdater::new(cache.clone())),
        };

        info!(
            mode = ?updater_config.mode,
            cache_backend = cache.backend_name(),
            fallback_ttl_secs = fallback_ttl.as_secs(),
            "Allocation service ready"
        );

        Self {
            db,
            ledger,
            summary,
            reader,
            updater,
            cancel: CancellationToken::new(),
        }
    }

    /// Open the configured database and build the service
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let db = init_database_with(&config.database).await?;
        let cache = CacheTier::from_config(&config.cache, &db);
        Ok(Self::new(db, cache, &config.updater, config.cache.fallback_ttl))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub fn update_mode(&self) -> UpdateMode {
        self.updater.mode()
    }

    pub fn queue(&self) -> Option<&Arc<AggregateQueue>> {
        self.updater.queue()
    }

    pub fn worker_counts(&self) -> Option<WorkerCounts> {
        self.queue().map(|queue| queue.counts())
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        categories::list_categories(&self.db).await
    }

    /// Record a submission, then hand it to the update pipeline
    ///
    /// Once the ledger write commits the submission key is returned; update
    /// pipeline trouble only affects aggregate freshness.
    pub async fn submit_allocation(
        &self,
        entries: &[AllocationInput],
        identity: &Identity,
    ) -> Result<SubmissionKey> {
        let submission_key = self.ledger.record_submission(entries, identity).await?;

        if let Err(e) = self.updater.on_submission_recorded(submission_key, entries).await {
            warn!(
                submission_key = %submission_key,
                error = %e,
                "Update pipeline failed after submission was recorded"
            );
        }

        Ok(submission_key)
    }

    pub async fn get_aggregates(&self) -> Result<AggregateReport> {
        self.reader.get_aggregates().await
    }

    /// One submission with its entries
    pub async fn get_submission(&self, key: &SubmissionKey) -> Result<SubmissionHistory> {
        let submission = self
            .ledger
            .find_submission(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Submission {}", key)))?;
        let entries = self.ledger.entries_for_submission(key).await?;
        Ok(SubmissionHistory { submission, entries })
    }

    /// Past submissions for a persistent visitor id, most recent first
    pub async fn get_submission_history(&self, user_id: &str) -> Result<Vec<SubmissionHistory>> {
        let submissions = self.ledger.submissions_for_identity(user_id).await?;

        let mut history = Vec::with_capacity(submissions.len());
        for submission in submissions {
            let entries = self.ledger.entries_for_submission(&submission.submission_key).await?;
            history.push(SubmissionHistory { submission, entries });
        }
        Ok(history)
    }

    /// Rebuild the summary table now and refresh the cache
    ///
    /// Returns the number of category rows written.
    pub async fn rebuild_aggregates(&self) -> Result<u64> {
        let rows = self.summary.rebuild_from_scratch().await?;
        match self.reader.refresh_cache().await {
            Ok(()) => {}
            Err(Error::CacheUnavailable(reason)) => {
                warn!(reason = %reason, "Rebuilt summary table but cache is unavailable");
            }
            Err(e) => return Err(e),
        }
        Ok(rows)
    }

    /// Ask the background workers to rebuild
    pub async fn enqueue_rebuild(&self) -> Result<()> {
        match self.queue() {
            Some(queue) => queue.enqueue(AggregateJob::Rebuild),
            None => Err(Error::QueueUnavailable(
                "service runs in synchronous update mode".to_string(),
            )),
        }
    }

    /// Periodically rebuild until [`AllocationService::shutdown`]
    ///
    /// Queued mode enqueues the rebuild; synchronous mode runs it inline on
    /// this task.
    pub fn spawn_scheduled_rebuild(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        info!(interval_secs = every.as_secs(), "Scheduled aggregate rebuild enabled");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = service.cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let result = match service.queue() {
                    Some(_) => service.enqueue_rebuild().await,
                    None => service.rebuild_aggregates().await.map(|_| ()),
                };
                if let Err(e) = result {
                    error!(error = %e, "Scheduled aggregate rebuild failed");
                }
            }
        })
    }

    /// Stop scheduled work and drain the aggregate queue
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(queue) = self.queue() {
            queue.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::RetryPolicy;
    use crate::test_support::{pct, seeded_pool};

    fn config(mode: UpdateMode) -> UpdaterConfig {
        UpdaterConfig {
            mode,
            queue_capacity: 8,
            workers: 1,
            retry: RetryPolicy::default(),
            rebuild_interval: None,
        }
    }

    async fn service(mode: UpdateMode) -> (tempfile::TempDir, AllocationService, Vec<Category>) {
        let (dir, pool, categories) = seeded_pool().await;
        let cache = CacheTier::new(Arc::new(MemoryCache::new(16)));
        let service = AllocationService::new(pool, cache, &config(mode), Duration::from_secs(300));
        (dir, service, categories)
    }

    #[tokio::test]
    async fn test_submission_round_trip() {
        let (_dir, service, categories) = service(UpdateMode::Synchronous).await;
        let entries = vec![
            AllocationInput::new(categories[1].id, pct("60")),
            AllocationInput::new(categories[0].id, pct("40")),
        ];

        let key = service
            .submit_allocation(&entries, &Identity::visitor("v1"))
            .await
            .unwrap();

        let result = service.get_submission(&key).await.unwrap();
        assert_eq!(result.submission.submission_key, key);
        assert_eq!(result.entries[0].category_name, "Healthcare");
        assert_eq!(result.entries[1].percentage, pct("60"));

        let history = service.get_submission_history("v1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].entries.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_submission_not_found() {
        let (_dir, service, _) = service(UpdateMode::Synchronous).await;
        let result = service.get_submission(&SubmissionKey::generate()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_enqueue_rebuild_requires_queue() {
        let (_dir, sync_service, _) = service(UpdateMode::Synchronous).await;
        assert!(matches!(
            sync_service.enqueue_rebuild().await,
            Err(Error::QueueUnavailable(_))
        ));
        assert!(sync_service.worker_counts().is_none());

        let (_dir, queued_service, _) = service(UpdateMode::Queued).await;
        queued_service.enqueue_rebuild().await.unwrap();
        queued_service.shutdown().await;
        assert_eq!(queued_service.worker_counts().unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_rebuild_refreshes_aggregates() {
        let (_dir, service, categories) = service(UpdateMode::Synchronous).await;
        let entries = vec![AllocationInput::new(categories[0].id, pct("100"))];
        service.submit_allocation(&entries, &Identity::anonymous()).await.unwrap();

        assert_eq!(service.rebuild_aggregates().await.unwrap(), categories.len() as u64);

        let report = service.get_aggregates().await.unwrap();
        assert_eq!(report.items.len(), categories.len());
        assert_eq!(report.items[0].average, pct("100"));
        assert_eq!(report.total_submissions, 1);
    }
}
