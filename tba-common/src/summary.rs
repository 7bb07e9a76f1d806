//! Category summary table
//!
//! One row per category holding the running total, contribution count and
//! rounded average. Increments are single-statement upserts, so concurrent
//! writers never lose an update; a full rebuild recomputes every row from the
//! ledger inside one transaction.
//!
//! `aggregated_submissions` records which submissions the table already
//! counts. A submission is applied at most once, whether it arrives through
//! an increment or a rebuild, in either order.

use crate::db::{AllocationInput, Category, CategoryAggregate, SubmissionKey, SummaryRow};
use crate::percent::Percent;
use crate::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SummaryTable {
    db: SqlitePool,
}

impl SummaryTable {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Atomically add one contribution to a category's running totals
    ///
    /// Creates the row if the category has none yet.
    pub async fn apply_increment(&self, category_id: i64, percentage: Percent) -> Result<()> {
        let mut conn = self.db.acquire().await?;
        upsert_increment(&mut conn, category_id, percentage).await
    }

    /// Apply every entry of one submission in a single transaction
    ///
    /// Returns `false` without changing anything when the submission is
    /// already counted, e.g. by a rebuild that ran after its ledger write.
    pub async fn apply_submission(
        &self,
        submission_key: &SubmissionKey,
        entries: &[AllocationInput],
    ) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        let marked = sqlx::query(
            "INSERT INTO aggregated_submissions (submission_key) VALUES (?) ON CONFLICT DO NOTHING",
        )
        .bind(submission_key.to_string())
        .execute(&mut *tx)
        .await?;
        if marked.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(submission_key = %submission_key, "Submission already counted, skipping");
            return Ok(false);
        }

        for entry in entries {
            upsert_increment(&mut tx, entry.category_id, entry.percentage).await?;
        }
        tx.commit().await?;

        debug!(
            submission_key = %submission_key,
            entry_count = entries.len(),
            "Applied submission to summary table"
        );
        Ok(true)
    }

    /// Discard all rows and recompute them from the ledger
    ///
    /// Every category gets a row, including those with no entries. Returns
    /// the number of rows written. Running this twice with no intervening
    /// submissions leaves identical contents.
    pub async fn rebuild_from_scratch(&self) -> Result<u64> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM category_aggregates")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM aggregated_submissions")
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO category_aggregates (
                category_id, total_hundredths, submission_count, average_hundredths
            )
            SELECT c.id,
                   COALESCE(SUM(e.percentage_hundredths), 0),
                   COUNT(e.id),
                   CASE WHEN COUNT(e.id) = 0 THEN 0
                        ELSE (2 * SUM(e.percentage_hundredths) + COUNT(e.id)) / (2 * COUNT(e.id))
                   END
            FROM categories c
            LEFT JOIN allocation_entries e ON e.category_id = c.id
            GROUP BY c.id
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let counted = sqlx::query(
            "INSERT INTO aggregated_submissions (submission_key) SELECT submission_key FROM submissions",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            categories = result.rows_affected(),
            submissions = counted.rows_affected(),
            "Rebuilt category summary table"
        );
        Ok(result.rows_affected())
    }

    /// Current aggregate for one category, if it has a row
    pub async fn get(&self, category_id: i64) -> Result<Option<CategoryAggregate>> {
        let row = sqlx::query(
            "SELECT total_hundredths, submission_count FROM category_aggregates WHERE category_id = ?",
        )
        .bind(category_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|row| {
            CategoryAggregate::new(
                category_id,
                row.get("total_hundredths"),
                row.get("submission_count"),
            )
        }))
    }

    pub async fn is_empty(&self) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM category_aggregates")
            .fetch_one(&self.db)
            .await?;
        Ok(count == 0)
    }

    /// All categories in display order with their summary aggregates
    ///
    /// Empty when the table has no rows at all (never built). Once populated,
    /// categories without a row are reported with a zero aggregate.
    pub async fn snapshot(&self) -> Result<Vec<SummaryRow>> {
        if self.is_empty().await? {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.name, c.description, c.color, c.display_order,
                   COALESCE(a.total_hundredths, 0) AS total_hundredths,
                   COALESCE(a.submission_count, 0) AS submission_count
            FROM categories c
            LEFT JOIN category_aggregates a ON a.category_id = c.id
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
                    row.get("submission_count"),
                );
                SummaryRow { category, aggregate }
            })
            .collect())
    }
}

async fn upsert_increment(
    conn: &mut SqliteConnection,
    category_id: i64,
    percentage: Percent,
) -> Result<()> {
    // SET expressions all see the pre-update row
    sqlx::query(
        r#"
        INSERT INTO category_aggregates (
            category_id, total_hundredths, submission_count, average_hundredths
        )
        VALUES (?, ?, 1, ?)
        ON CONFLICT(category_id) DO UPDATE SET
            total_hundredths = total_hundredths + excluded.total_hundredths,
            submission_count = submission_count + 1,
            average_hundredths =
                (2 * (total_hundredths + excluded.total_hundredths) + submission_count + 1)
                / (2 * (submission_count + 1))
        "#,
    )
    .bind(category_id)
    .bind(percentage.hundredths())
    .bind(percentage.hundredths())
    .execute(conn)
    .await?;

    Ok(())
}
