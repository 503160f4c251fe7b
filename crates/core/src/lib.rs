//! Domain model for the custom connector job orchestrator.
//!
//! Entity types, the job state machine, request validation and the retry
//! policy used by the reconcilers. Apart from the environment helpers in
//! [`config`], nothing here performs I/O; storage, transport and scheduling
//! live in the other workspace crates.

pub mod change;
pub mod completion;
pub mod config;
pub mod connector;
pub mod environment;
pub mod error;
pub mod ids;
pub mod job;
pub mod retry;
pub mod status;
pub mod types;
