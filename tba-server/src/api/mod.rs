//! HTTP API handlers for tba-server

pub mod aggregates;
pub mod allocations;
pub mod buildinfo;
pub mod categories;
pub mod error;
pub mod health;
pub mod history;
pub mod identity;

pub use aggregates::get_aggregates;
pub use allocations::{get_submission, submit_allocation};
pub use buildinfo::get_build_info;
pub use categories::list_categories;
pub use error::ApiError;
pub use health::health_routes;
pub use history::get_history;
pub use identity::VisitorIdentity;
