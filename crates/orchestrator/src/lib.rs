//! Custom connector job lifecycle orchestration.
//!
//! Guarantees at most one active job per connector and drives every job
//! through `STARTED -> RUNNING -> {SUCCEEDED | FAILED | STOPPED}`:
//!
//! - [`AdmissionController`] performs StartJob/StopJob synchronously inside
//!   the request, using the connector's version as the only lock.
//! - [`DispatchReconciler`] submits and cancels work on the
//!   [`ExecutionBackend`](ccf_backend::ExecutionBackend), triggered by the
//!   store's change feed and a periodic re-scan.
//! - [`CompletionReconciler`] turns terminal events into final job state
//!   and releases the connector. [`CompletionPoller`] backs it up by
//!   describing in-flight jobs.
//! - [`ConnectorRegistry`] and [`RetentionSweeper`] cover connector
//!   administration and job history cleanup.

pub mod admission;
pub mod backoff;
pub mod completion;
pub mod config;
pub mod dispatch;
mod finalize;
pub mod poller;
pub mod registry;
pub mod retention;
pub mod runtime;

pub use admission::AdmissionController;
pub use completion::CompletionReconciler;
pub use config::OrchestratorConfig;
pub use dispatch::DispatchReconciler;
pub use poller::CompletionPoller;
pub use registry::ConnectorRegistry;
pub use retention::RetentionSweeper;
pub use runtime::{Orchestrator, ReconcilerHandles};
