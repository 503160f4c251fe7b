//! Repository layer: one zero-sized struct per table.
//!
//! Functions are generic over [`sqlx::PgExecutor`] so the same query can run
//! against the pool or inside a transaction.

pub mod connector_repo;
pub mod job_repo;

pub use connector_repo::ConnectorRepo;
pub use job_repo::JobRepo;
