//! Database models

use crate::percent::Percent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Budget category a visitor can allocate to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Hex color for charts (e.g. `#e74c3c`)
    pub color: String,
    pub display_order: i64,
}

/// Category definition used when seeding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    pub description: String,
    pub color: String,
    pub display_order: i64,
}

/// Grouping key shared by one submission and all of its allocation entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionKey(pub Uuid);

impl SubmissionKey {
    pub fn generate() -> Self {
        SubmissionKey(Uuid::new_v4())
    }
}

impl fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SubmissionKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SubmissionKey)
    }
}

/// Who submitted: opt-in persistent visitor id plus originating IP
///
/// Passed explicitly into every ledger write; an absent `user_id` still
/// records the allocation for aggregates but leaves no retrievable history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn visitor(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ip_address: None,
        }
    }

    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }
}

/// One category's share within a submission, as provided by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationInput {
    pub category_id: i64,
    pub percentage: Percent,
}

impl AllocationInput {
    pub fn new(category_id: i64, percentage: Percent) -> Self {
        Self {
            category_id,
            percentage,
        }
    }
}

/// One completed 100% allocation act
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub submission_key: SubmissionKey,
    pub user_id: Option<String>,
    /// RFC 3339 UTC timestamp
    pub submitted_at: String,
    pub ip_address: Option<String>,
}

/// Recorded allocation row joined with its category's display fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub id: i64,
    pub submission_key: SubmissionKey,
    pub category_id: i64,
    pub category_name: String,
    pub category_color: String,
    pub percentage: Percent,
    pub created_at: String,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
}

/// Running statistics for one category
///
/// Only constructible through [`CategoryAggregate::new`], which derives
/// `average` from `total_hundredths` and `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryAggregate {
    category_id: i64,
    total_hundredths: i64,
    count: i64,
    average: Percent,
}

impl CategoryAggregate {
    pub fn new(category_id: i64, total_hundredths: i64, count: i64) -> Self {
        Self {
            category_id,
            total_hundredths,
            count,
            average: Percent::average(total_hundredths, count),
        }
    }

    pub fn category_id(&self) -> i64 {
        self.category_id
    }

    pub fn total_hundredths(&self) -> i64 {
        self.total_hundredths
    }

    /// Sum of all percentages as a decimal number (e.g. `330.0`)
    pub fn total(&self) -> f64 {
        self.total_hundredths as f64 / 100.0
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn average(&self) -> Percent {
        self.average
    }
}

/// Summary table row joined with its category
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub category: Category,
    pub aggregate: CategoryAggregate,
}

/// Denormalized per-category average as held by the cache tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateItem {
    pub category_name: String,
    /// Average allocation, rounded to two decimals
    pub average: Percent,
    pub color: String,
}

/// Site-wide aggregate read result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub items: Vec<AggregateItem>,
    pub total_submissions: i64,
}

/// One past submission with its entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionHistory {
    pub submission: Submission,
    pub entries: Vec<AllocationEntry>,
}
