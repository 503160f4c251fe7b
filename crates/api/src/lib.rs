//! HTTP surface of the connector job orchestrator.
//!
//! The library exposes configuration, state, routing and error mapping so
//! the binary and the integration tests build the same application.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod query;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
