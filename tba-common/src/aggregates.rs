//! Aggregate read pipeline
//!
//! Ordered fallback over three tiers, first hit wins:
//! 1. Cache tier snapshot
//! 2. Summary table (backfills the cache with no expiry)
//! 3. Live computation from the ledger (backfills the cache with a short expiry)
//!
//! Every tier yields the same shape, so callers cannot tell which one served
//! the read. An unreachable cache is logged and treated as a miss.

use crate::cache::{CacheTier, CacheTtl};
use crate::db::{AggregateItem, AggregateReport, SummaryRow};
use crate::ledger::LedgerStore;
use crate::summary::SummaryTable;
use crate::Result;
use std::time::Duration;
use tracing::{debug, warn};

/// Read path that produced an aggregate snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Cache,
    SummaryTable,
    Ledger,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Cache => "cache",
            Tier::SummaryTable => "summary_table",
            Tier::Ledger => "ledger",
        }
    }
}

/// Denormalize summary rows into the cached shape
pub fn to_items(rows: &[SummaryRow]) -> Vec<AggregateItem> {
    rows.iter()
        .map(|row| AggregateItem {
            category_name: row.category.name.clone(),
            average: row.aggregate.average(),
            color: row.category.color.clone(),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct AggregateReader {
    ledger: LedgerStore,
    summary: SummaryTable,
    cache: CacheTier,
    fallback_ttl: Duration,
}

impl AggregateReader {
    pub fn new(
        ledger: LedgerStore,
        summary: SummaryTable,
        cache: CacheTier,
        fallback_ttl: Duration,
    ) -> Self {
        Self {
            ledger,
            summary,
            cache,
            fallback_ttl,
        }
    }

    /// Site-wide aggregates plus total submission count
    pub async fn get_aggregates(&self) -> Result<AggregateReport> {
        let (items, tier) = self.read_items().await?;
        let total_submissions = self.total_submissions(tier).await?;
        Ok(AggregateReport {
            items,
            total_submissions,
        })
    }

    /// Walk the tiers in order and return the first snapshot found
    ///
    /// The ledger is the last resort and always answers.
    pub async fn read_items(&self) -> Result<(Vec<AggregateItem>, Tier)> {
        let (items, tier) = if let Some(items) = self.from_cache().await {
            (items, Tier::Cache)
        } else if let Some(items) = self.from_summary().await? {
            (items, Tier::SummaryTable)
        } else {
            (self.from_ledger().await?, Tier::Ledger)
        };

        debug!(tier = tier.as_str(), items = items.len(), "Served aggregates");
        Ok((items, tier))
    }

    async fn from_cache(&self) -> Option<Vec<AggregateItem>> {
        match self.cache.get_snapshot().await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Cache tier unavailable, falling through");
                None
            }
        }
    }

    /// Summary table snapshot, backfilled with no expiry; `None` until built
    async fn from_summary(&self) -> Result<Option<Vec<AggregateItem>>> {
        let rows = self.summary.snapshot().await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let items = to_items(&rows);
        self.backfill(&items, CacheTtl::Forever).await;
        Ok(Some(items))
    }

    /// Cold start: averages straight from the ledger, cached only briefly
    async fn from_ledger(&self) -> Result<Vec<AggregateItem>> {
        let items = to_items(&self.ledger.live_aggregates().await?);
        self.backfill(&items, CacheTtl::Expires(self.fallback_ttl)).await;
        Ok(items)
    }

    async fn backfill(&self, items: &[AggregateItem], ttl: CacheTtl) {
        if let Err(e) = self.cache.set_snapshot(items, ttl).await {
            warn!(error = %e, "Failed to backfill aggregate snapshot");
        }
    }

    /// Total submissions: from the cache when the snapshot came from there,
    /// otherwise counted from the ledger and backfilled
    async fn total_submissions(&self, tier: Tier) -> Result<i64> {
        if tier == Tier::Cache {
            match self.cache.get_total_submissions().await {
                Ok(Some(count)) => return Ok(count),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Cache tier unavailable reading submission count"),
            }
        }

        let count = self.ledger.count_submissions().await?;
        let ttl = match tier {
            Tier::Ledger => CacheTtl::Expires(self.fallback_ttl),
            Tier::Cache | Tier::SummaryTable => CacheTtl::Forever,
        };
        if let Err(e) = self.cache.set_total_submissions(count, ttl).await {
            warn!(error = %e, "Failed to backfill submission count");
        }
        Ok(count)
    }

    /// Recompute the snapshot from the summary table and store it with no expiry
    ///
    /// Also refreshes the submission count. Used after increments and rebuilds.
    pub async fn refresh_cache(&self) -> Result<()> {
        let items = to_items(&self.summary.snapshot().await?);
        let count = self.ledger.count_submissions().await?;

        self.cache.set_snapshot(&items, CacheTtl::Forever).await?;
        self.cache.set_total_submissions(count, CacheTtl::Forever).await?;

        debug!(items = items.len(), total_submissions = count, "Refreshed aggregate cache");
        Ok(())
    }

    pub fn cache(&self) -> &CacheTier {
        &self.cache
    }
}
