//! Operational statistics for the admin CLI

use crate::percent::Percent;
use crate::Result;
use chrono::{Duration, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

/// Days shown in the daily breakdown
pub const DAILY_BREAKDOWN_DAYS: usize = 10;

/// Submission-count patterns shown in engagement stats
pub const TOP_PATTERNS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverallStats {
    pub total_submissions: i64,
    pub total_allocations: i64,
    pub unique_users: i64,
    pub unique_submission_keys: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    /// `YYYY-MM-DD` (UTC)
    pub day: String,
    pub submissions: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentActivity {
    pub days: u32,
    pub submissions: i64,
    pub allocations: i64,
    /// Most recent day first
    pub daily: Vec<DailyCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryStat {
    pub name: String,
    pub average: Percent,
    pub submission_count: i64,
}

/// How many identified users made a given number of submissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionPattern {
    pub submissions: i64,
    pub user_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementStats {
    pub total_users: i64,
    pub repeat_users: i64,
    /// Highest submission count first
    pub patterns: Vec<SubmissionPattern>,
}

impl EngagementStats {
    /// Share of identified users with more than one submission, in percent
    pub fn repeat_rate(&self) -> Option<f64> {
        (self.total_users > 0).then(|| self.repeat_users as f64 * 100.0 / self.total_users as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub overall: OverallStats,
    pub recent: RecentActivity,
    /// Summary table rows, highest average first; empty if never built
    pub categories: Vec<CategoryStat>,
    pub engagement: EngagementStats,
}

pub async fn collect_stats(pool: &SqlitePool, days: u32) -> Result<DatabaseStats> {
    Ok(DatabaseStats {
        overall: overall_stats(pool).await?,
        recent: recent_activity(pool, days).await?,
        categories: category_stats(pool).await?,
        engagement: engagement_stats(pool).await?,
    })
}

pub async fn overall_stats(pool: &SqlitePool) -> Result<OverallStats> {
    let row = sqlx::query(
        r#"
        SELECT
            (SELECT COUNT(*) FROM submissions) AS total_submissions,
            (SELECT COUNT(*) FROM allocation_entries) AS total_allocations,
            (SELECT COUNT(DISTINCT user_id) FROM submissions) AS unique_users,
            (SELECT COUNT(DISTINCT submission_key) FROM allocation_entries) AS unique_submission_keys
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(OverallStats {
        total_submissions: row.get("total_submissions"),
        total_allocations: row.get("total_allocations"),
        unique_users: row.get("unique_users"),
        unique_submission_keys: row.get("unique_submission_keys"),
    })
}

pub async fn recent_activity(pool: &SqlitePool, days: u32) -> Result<RecentActivity> {
    let cutoff = (Utc::now() - Duration::days(i64::from(days)))
        .to_rfc3339_opts(SecondsFormat::Micros, true);

    let submissions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM submissions WHERE submitted_at >= ?")
            .bind(&cutoff)
            .fetch_one(pool)
            .await?;

    let allocations: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM allocation_entries WHERE created_at >= ?")
            .bind(&cutoff)
            .fetch_one(pool)
            .await?;

    let daily = sqlx::query(
        r#"
        SELECT substr(submitted_at, 1, 10) AS day, COUNT(*) AS submissions
        FROM submissions
        WHERE submitted_at >= ?
        GROUP BY day
        ORDER BY day DESC
        LIMIT ?
        "#,
    )
    .bind(&cutoff)
    .bind(DAILY_BREAKDOWN_DAYS as i64)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| DailyCount {
        day: row.get("day"),
        submissions: row.get("submissions"),
    })
    .collect();

    Ok(RecentActivity {
        days,
        submissions,
        allocations,
        daily,
    })
}

pub async fn category_stats(pool: &SqlitePool) -> Result<Vec<CategoryStat>> {
    let rows = sqlx::query(
        r#"
        SELECT c.name, a.total_hundredths, a.submission_count
        FROM category_aggregates a
        JOIN categories c ON c.id = a.category_id
        ORDER BY a.average_hundredths DESC, c.display_order ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let total: i64 = row.get("total_hundredths");
            let count: i64 = row.get("submission_count");
            CategoryStat {
                name: row.get("name"),
                average: Percent::average(total, count),
                submission_count: count,
            }
        })
        .collect())
}

pub async fn engagement_stats(pool: &SqlitePool) -> Result<EngagementStats> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS total_users,
               COALESCE(SUM(CASE WHEN submissions > 1 THEN 1 ELSE 0 END), 0) AS repeat_users
        FROM (
            SELECT user_id, COUNT(*) AS submissions
            FROM submissions
            WHERE user_id IS NOT NULL
            GROUP BY user_id
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    let patterns = sqlx::query(
        r#"
        SELECT submissions, COUNT(*) AS user_count
        FROM (
            SELECT user_id, COUNT(*) AS submissions
            FROM submissions
            WHERE user_id IS NOT NULL
            GROUP BY user_id
        )
        GROUP BY submissions
        ORDER BY submissions DESC
        LIMIT ?
        "#,
    )
    .bind(TOP_PATTERNS)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| SubmissionPattern {
        submissions: row.get("submissions"),
        user_count: row.get("user_count"),
    })
    .collect();

    Ok(EngagementStats {
        total_users: row.get("total_users"),
        repeat_users: row.get("repeat_users"),
        patterns,
    })
}
