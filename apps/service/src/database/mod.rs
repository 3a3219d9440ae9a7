//! Persistence for the watchpost service.
//!
//! Implements the engine's `SiteStore` and `ApprovalStore` ports on top of
//! libsql. The engine itself never sees SQL; everything below this module
//! boundary is service plumbing.

pub mod migrations;
pub mod repository;

pub use repository::SqlRepository;

use anyhow::Result;

/// Initialize database with schema.
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
