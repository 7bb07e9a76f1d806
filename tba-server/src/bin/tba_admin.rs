//! tba-admin - Administrative commands for the tax budget allocator
//!
//! Runs against the same database as the server. Commands:
//! - `seed-categories`: insert the default category catalogue
//! - `rebuild`: recompute the summary table and refresh the shared cache
//! - `stats`: print database statistics

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tba_common::cache::{CacheTier, DatabaseCache};
use tba_common::categories::seed_default_categories;
use tba_common::config::{AppConfig, CacheBackendKind, UpdateMode, UpdaterConfig};
use tba_common::db::init_database_with;
use tba_common::stats::{collect_stats, DatabaseStats};
use tba_common::AllocationService;
use tba_server::logging;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "tba-admin")]
#[command(about = "Administrative commands for the tax budget allocator")]
#[command(version)]
struct Args {
    /// Config file (overrides TBA_CONFIG and the default locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data folder holding the database (overrides TBA_DATA_FOLDER)
    #[arg(short, long, global = true)]
    data_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert the default budget categories (idempotent)
    SeedCategories,
    /// Rebuild the category summary table from all recorded allocations
    Rebuild,
    /// Display database statistics
    Stats {
        /// Number of days to include in recent activity
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log = logging::init_tracing();

    let config = AppConfig::load(args.config.as_deref(), args.data_folder.as_deref())
        .context("Failed to load configuration")?;
    log.apply_level(&config.log_level);

    let db = init_database_with(&config.database)
        .await
        .with_context(|| format!("Failed to open {}", config.database.path.display()))?;

    match args.command {
        Command::SeedCategories => {
            let report = seed_default_categories(&db).await?;
            println!(
                "Seeded categories: {} created, {} already present",
                report.created.len(),
                report.existing.len()
            );
        }
        Command::Rebuild => {
            if config.cache.backend == CacheBackendKind::Memory {
                warn!("Cache backend is in-process memory; a running server keeps its own cache");
            }

            let purged = DatabaseCache::new(db.clone()).purge_expired().await?;
            info!(purged, "Purged expired cache entries");

            // No workers for a one-shot rebuild
            let updater = UpdaterConfig {
                mode: UpdateMode::Synchronous,
                ..config.updater.clone()
            };
            let cache = CacheTier::from_config(&config.cache, &db);
            let service = AllocationService::new(db.clone(), cache, &updater, config.cache.fallback_ttl);

            let rows = service.rebuild_aggregates().await.context("Rebuild failed")?;
            println!("Rebuilt aggregates for {} categories", rows);
        }
        Command::Stats { days } => {
            let stats = collect_stats(&db, days).await?;
            print_stats(&stats);
        }
    }

    db.close().await;
    Ok(())
}

fn print_stats(stats: &DatabaseStats) {
    let rule = "=".repeat(60);
    println!("\n{}", rule);
    println!("TAX BUDGET ALLOCATOR - DATABASE STATISTICS");
    println!("{}\n", rule);

    let overall = &stats.overall;
    println!("OVERALL STATISTICS");
    println!("  Total Submissions: {}", overall.total_submissions);
    println!("  Total Allocations: {}", overall.total_allocations);
    println!("  Unique Users: {}", overall.unique_users);
    println!("  Unique Submission Keys: {}", overall.unique_submission_keys);
    println!();

    let recent = &stats.recent;
    println!("RECENT ACTIVITY (Last {} days)", recent.days);
    println!("  Submissions: {}", recent.submissions);
    println!("  Allocations: {}", recent.allocations);
    if !recent.daily.is_empty() {
        println!("\n  Daily Breakdown:");
        for day in &recent.daily {
            println!("    {}: {} submissions", day.day, day.submissions);
        }
    }
    println!();

    println!("CATEGORY AGGREGATES");
    if stats.categories.is_empty() {
        println!("  No aggregate data available");
    } else {
        println!("  {:<30} {:>10} {:>15}", "Category", "Avg %", "Submissions");
        println!("  {}", "-".repeat(58));
        for category in &stats.categories {
            println!(
                "  {:<30} {:>9}% {:>14}",
                category.name, category.average, category.submission_count
            );
        }
    }
    println!();

    let engagement = &stats.engagement;
    println!("USER ENGAGEMENT");
    match engagement.repeat_rate() {
        Some(rate) => println!(
            "  Repeat Users: {} / {} ({:.1}%)",
            engagement.repeat_users, engagement.total_users, rate
        ),
        None => println!("  No user data available"),
    }
    if !engagement.patterns.is_empty() {
        println!("\n  Submission Patterns:");
        for pattern in &engagement.patterns {
            println!(
                "    {} users with {} submission(s)",
                pattern.user_count, pattern.submissions
            );
        }
    }
    println!("\n{}\n", rule);
}
