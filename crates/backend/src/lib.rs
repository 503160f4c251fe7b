//! Execution backend port and its implementations.
//!
//! The orchestrator needs exactly three operations from whatever runs the
//! connector containers (submit, cancel and describe) plus a stream of
//! terminal events, which arrive on the
//! [`CompletionInbox`](ccf_events::CompletionInbox) or the HTTP webhook.
//!
//! - [`HttpBackend`]: REST batch service via `reqwest`.
//! - [`MemoryBackend`]: scriptable in-process backend for development and
//!   tests.

pub mod config;
pub mod error;
pub mod http;
pub mod memory;
pub mod port;

pub use config::{build_backend, BackendConfig, BackendKind};
pub use error::BackendError;
pub use http::HttpBackend;
pub use memory::MemoryBackend;
pub use port::{BackendJobState, ExecutionBackend, SubmitRequest};
