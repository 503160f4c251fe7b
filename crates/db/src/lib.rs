//! Metadata store for connectors and connector jobs.
//!
//! [`MetadataStore`] is the port the orchestrator talks to. Two
//! implementations share its conditional-write semantics:
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, built on the repositories in
//!   [`repositories`].
//! - [`MemoryStore`]: in-process maps, for local development and tests.

use sqlx::postgres::PgPoolOptions;

pub mod error;
pub mod memory;
pub mod models;
pub mod pg_store;
pub mod repositories;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use pg_store::PgStore;
pub use store::MetadataStore;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
