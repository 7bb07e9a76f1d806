//! Database models, schema and retry helpers

pub mod init;
pub mod models;
pub mod retry;

pub use init::*;
pub use models::*;
pub use retry::retry_on_lock;
