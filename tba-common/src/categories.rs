//! Budget category catalogue
//!
//! Categories are seeded administratively and are effectively immutable
//! during normal operation. Names are globally unique.

use crate::db::{Category, NewCategory};
use crate::{Error, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::info;

/// Default categories: (name, description, color, display order)
const DEFAULT_CATEGORIES: [(&str, &str, &str, i64); 10] = [
    ("Healthcare", "Public health services, Medicare, Medicaid", "#e74c3c", 1),
    ("Education", "Public schools, universities, student aid", "#3498db", 2),
    ("Defense & Military", "Armed forces, veterans affairs, national security", "#2c3e50", 3),
    ("Infrastructure", "Roads, bridges, public transit, utilities", "#95a5a6", 4),
    ("Social Security", "Retirement benefits, disability insurance", "#9b59b6", 5),
    ("Environment", "Climate action, conservation, renewable energy", "#27ae60", 6),
    ("Science & Research", "Scientific research, space exploration, innovation", "#16a085", 7),
    ("Public Safety", "Police, fire departments, emergency services", "#e67e22", 8),
    ("Housing & Community", "Affordable housing, urban development", "#f39c12", 9),
    ("Other", "All other government services", "#34495e", 10),
];

/// Outcome of seeding the default catalogue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
}

/// The built-in category definitions
pub fn default_categories() -> Vec<NewCategory> {
    DEFAULT_CATEGORIES
        .iter()
        .map(|(name, description, color, display_order)| NewCategory {
            name: name.to_string(),
            description: description.to_string(),
            color: color.to_string(),
            display_order: *display_order,
        })
        .collect()
}

/// List all categories in display order
pub async fn list_categories(pool: &SqlitePool) -> Result<Vec<Category>> {
    let rows = sqlx::query(
        r#"
        SELECT id, name, description, color, display_order
        FROM categories
        ORDER BY display_order ASC, name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(category_from_row).collect())
}

/// Insert a new category; a duplicate name is a validation error
pub async fn create_category(pool: &SqlitePool, new: &NewCategory) -> Result<Category> {
    if new.name.trim().is_empty() {
        return Err(Error::Validation("Category name must not be empty".to_string()));
    }

    let result = sqlx::query(
        r#"
        INSERT INTO categories (name, description, color, display_order, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(name) DO NOTHING
        "#,
    )
    .bind(&new.name)
    .bind(&new.description)
    .bind(&new.color)
    .bind(new.display_order)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Validation(format!(
            "Category already exists: {}",
            new.name
        )));
    }

    Ok(Category {
        id: result.last_insert_rowid(),
        name: new.name.clone(),
        description: new.description.clone(),
        color: new.color.clone(),
        display_order: new.display_order,
    })
}

/// Idempotently insert the default catalogue
pub async fn seed_default_categories(pool: &SqlitePool) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    for new in default_categories() {
        match create_category(pool, &new).await {
            Ok(category) => {
                info!("Created category: {}", category.name);
                report.created.push(category.name);
            }
            Err(Error::Validation(_)) => {
                info!("Category already exists: {}", new.name);
                report.existing.push(new.name);
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        created = report.created.len(),
        existing = report.existing.len(),
        "Category seeding complete"
    );

    Ok(report)
}

fn category_from_row(row: &sqlx::sqlite::SqliteRow) -> Category {
    Category {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        color: row.get("color"),
        display_order: row.get("display_order"),
    }
}
