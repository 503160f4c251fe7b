//! Row types for the `connectors` and `connector_jobs` tables.
//!
//! Rows carry raw column values; conversion into the `ccf-core` entities
//! validates status ids and fails with [`StoreError::Corrupt`](crate::StoreError::Corrupt).

pub mod connector;
pub mod job;

pub use connector::ConnectorRow;
pub use job::JobRow;
