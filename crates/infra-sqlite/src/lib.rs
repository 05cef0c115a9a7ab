// Citewatch Infrastructure - SQLite Adapter
// Implements: QueueStore, StateStore, DurableScheduler

mod connection;
mod error;
mod migration;
mod queue_store;
mod schedule_store;
mod state_store;

pub use connection::{create_memory_pool, create_pool};
pub use migration::run_migrations;
pub use queue_store::SqliteQueueStore;
pub use schedule_store::SqliteScheduler;
pub use state_store::SqliteStateStore;

// Note: sqlx::Error conversion is handled by `error::map_sqlx_error`
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
