//! # Tax Budget Allocator Common Library
//!
//! Storage and aggregation core shared by the HTTP server and the admin CLI:
//! - Ledger of submissions and allocation entries
//! - Category summary table (running totals per category)
//! - Cache tier with pluggable backends
//! - Three-tier aggregate read pipeline
//! - Update pipeline (background queue or synchronous degraded mode)
//! - Configuration loading and database initialization

pub mod aggregates;
pub mod cache;
pub mod categories;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod percent;
pub mod service;
pub mod stats;
pub mod summary;
pub mod updater;

pub use error::{Error, Result};
pub use percent::Percent;
pub use service::AllocationService;
