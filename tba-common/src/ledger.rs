//! Ledger store: append-only record of submissions and their allocation entries
//!
//! A submission and all of its entries commit in one transaction, sharing a
//! freshly generated grouping key. Rows are never updated or deleted.

use crate::db::{
    AllocationEntry, AllocationInput, CategoryAggregate, Category, Identity, Submission,
    SubmissionKey, SummaryRow,
};
use crate::percent::{format_hundredths, Percent, FULL_ALLOCATION};
use crate::{Error, Result};
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::{debug, info};

/// Check that a submission's entries are well formed and sum to exactly 100.00
///
/// Each [`Percent`] is already range-checked at construction; this adds the
/// per-submission rules: at least one entry, no category twice, exact total.
pub fn validate_allocation(entries: &[AllocationInput]) -> Result<()> {
    if entries.is_empty() {
        return Err(Error::Validation("Allocation must contain at least one category".to_string()));
    }

    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.category_id) {
            return Err(Error::Validation(format!(
                "Category {} appears more than once",
                entry.category_id
            )));
        }
    }

    let total: i64 = entries.iter().map(|e| e.percentage.hundredths()).sum();
    if total != FULL_ALLOCATION {
        return Err(Error::Validation(format!(
            "Total allocation must equal 100%. Current total: {}%",
            format_hundredths(total)
        )));
    }

    Ok(())
}

/// Durable store of submissions and allocation entries
#[derive(Debug, Clone)]
pub struct LedgerStore {
    db: SqlitePool,
}

impl LedgerStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Atomically persist one submission and one entry per category
    ///
    /// Fails with [`Error::Validation`] before touching storage when the
    /// entries are malformed, do not sum to 100.00, or name unknown categories.
    pub async fn record_submission(
        &self,
        entries: &[AllocationInput],
        identity: &Identity,
    ) -> Result<SubmissionKey> {
        validate_allocation(entries)?;
        self.ensure_categories_exist(entries).await?;

        let submission_key = SubmissionKey::generate();
        let key_text = submission_key.to_string();
        let submitted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO submissions (submission_key, user_id, submitted_at, ip_address)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&key_text)
        .bind(identity.user_id.as_deref())
        .bind(&submitted_at)
        .bind(identity.ip_address.as_deref())
        .execute(&mut *tx)
        .await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO allocation_entries (
                    submission_key, user_id, category_id,
                    percentage_hundredths, created_at, ip_address
                )
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&key_text)
            .bind(identity.user_id.as_deref())
            .bind(entry.category_id)
            .bind(entry.percentage.hundredths())
            .bind(&submitted_at)
            .bind(identity.ip_address.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            submission_key = %submission_key,
            entry_count = entries.len(),
            identified = identity.user_id.is_some(),
            "Recorded submission"
        );

        Ok(submission_key)
    }

    async fn ensure_categories_exist(&self, entries: &[AllocationInput]) -> Result<()> {
        let known: HashSet<i64> = sqlx::query_scalar::<_, i64>("SELECT id FROM categories")
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .collect();

        if let Some(unknown) = entries.iter().find(|e| !known.contains(&e.category_id)) {
            return Err(Error::Validation(format!(
                "Unknown category: {}",
                unknown.category_id
            )));
        }

        Ok(())
    }

    /// Look up a single submission
    pub async fn find_submission(&self, key: &SubmissionKey) -> Result<Option<Submission>> {
        let row = sqlx::query(
            r#"
            SELECT submission_key, user_id, submitted_at, ip_address
            FROM submissions
            WHERE submission_key = ?
            "#,
        )
        .bind(key.to_string())
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(submission_from_row).transpose()
    }

    /// Entries of one submission, ordered by category display order
    pub async fn entries_for_submission(&self, key: &SubmissionKey) -> Result<Vec<AllocationEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.submission_key, e.category_id, c.name AS category_name,
                   c.color AS category_color, e.percentage_hundredths, e.created_at,
                   e.user_id, e.ip_address
            FROM allocation_entries e
            JOIN categories c ON c.id = e.category_id
            WHERE e.submission_key = ?
            ORDER BY c.display_order ASC, c.name ASC
            "#,
        )
        .bind(key.to_string())
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Submissions made under a persistent visitor id, most recent first
    pub async fn submissions_for_identity(&self, user_id: &str) -> Result<Vec<Submission>> {
        let rows = sqlx::query(
            r#"
            SELECT submission_key, user_id, submitted_at, ip_address
            FROM submissions
            WHERE user_id = ?
            ORDER BY submitted_at DESC, rowid DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        debug!(user_id, count = rows.len(), "Loaded submission history");

        rows.iter().map(submission_from_row).collect()
    }

    /// Total number of submissions ever recorded
    pub async fn count_submissions(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// Per-category aggregates computed directly from raw entries
    ///
    /// Every category appears, in display order; categories without entries
    /// carry a zero aggregate.
    pub async fn live_aggregates(&self) -> Result<Vec<SummaryRow>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.name, c.description, c.color, c.display_order,
                   COALESCE(SUM(e.percentage_hundredths), 0) AS total_hundredths,
                   COUNT(e.id) AS entry_count
            FROM categories c
            LEFT JOIN allocation_entries e ON e.category_id = c.id
            GROUP BY c.id
            ORDER BY c.display_order ASC, c.name ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let category = Category {
                    id: row.get("id"),
                    name: row.get("name"),
                    description: row.get("description"),
                    color: row.get("color"),
                    display_order: row.get("display_order"),
                };
                let aggregate = CategoryAggregate::new(
                    category.id,
                    row.get("total_hundredths"),
                    row.get("entry_count"),
                );
                SummaryRow { category, aggregate }
            })
            .collect())
    }
}

fn parse_submission_key(text: &str) -> Result<SubmissionKey> {
    text.parse()
        .map_err(|e| Error::Internal(format!("Corrupt submission key {:?}: {}", text, e)))
}

fn submission_from_row(row: &SqliteRow) -> Result<Submission> {
    let key_text: String = row.get("submission_key");
    Ok(Submission {
        submission_key: parse_submission_key(&key_text)?,
        user_id: row.get("user_id"),
        submitted_at: row.get("submitted_at"),
        ip_address: row.get("ip_address"),
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<AllocationEntry> {
    let key_text: String = row.get("submission_key");
    let hundredths: i64 = row.get("percentage_hundredths");
    let percentage = Percent::from_hundredths(hundredths)
        .map_err(|e| Error::Internal(format!("Corrupt allocation entry: {}", e)))?;

    Ok(AllocationEntry {
        id: row.get("id"),
        submission_key: parse_submission_key(&key_text)?,
        category_id: row.get("category_id"),
        category_name: row.get("category_name"),
        category_color: row.get("category_color"),
        percentage,
        created_at: row.get("created_at"),
        user_id: row.get("user_id"),
        ip_address: row.get("ip_address"),
    })
}
