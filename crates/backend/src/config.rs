use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ccf_core::config::{env_opt, env_or, ConfigError};
use ccf_events::CompletionInbox;

use crate::http::HttpBackend;
use crate::memory::MemoryBackend;
use crate::port::ExecutionBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Http,
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "memory" => Ok(Self::Memory),
            other => Err(format!("expected 'http' or 'memory', got '{other}'")),
        }
    }
}

/// Execution backend selection loaded from environment variables.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Base URL of the batch service (required for `http`).
    pub url: Option<String>,
    /// Queue every job is submitted to.
    pub queue: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl BackendConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default    |
    /// |----------------------------------|------------|
    /// | `EXECUTION_BACKEND`              | `memory`   |
    /// | `EXECUTION_BACKEND_URL`          | (none)     |
    /// | `EXECUTION_BACKEND_QUEUE`        | `default`  |
    /// | `EXECUTION_BACKEND_TIMEOUT_SECS` | `15`       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            kind: env_or("EXECUTION_BACKEND", BackendKind::Memory)?,
            url: env_opt("EXECUTION_BACKEND_URL"),
            queue: env_or("EXECUTION_BACKEND_QUEUE", "default".to_string())?,
            timeout_secs: env_or("EXECUTION_BACKEND_TIMEOUT_SECS", 15)?,
        })
    }

    pub fn memory() -> Self {
        Self {
            kind: BackendKind::Memory,
            url: None,
            queue: "default".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Construct the configured backend.
///
/// The memory backend publishes its terminal events on `inbox`.
pub fn build_backend(
    config: &BackendConfig,
    inbox: Arc<CompletionInbox>,
) -> Result<Arc<dyn ExecutionBackend>, ConfigError> {
    match config.kind {
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new(inbox))),
        BackendKind::Http => {
            let url = config.url.clone().ok_or(ConfigError::Missing {
                var: "EXECUTION_BACKEND_URL",
            })?;
            let backend = HttpBackend::new(
                url.clone(),
                config.queue.clone(),
                Duration::from_secs(config.timeout_secs),
            )
            .map_err(|e| ConfigError::Invalid {
                var: "EXECUTION_BACKEND_URL",
                value: url,
                reason: e.to_string(),
            })?;
            Ok(Arc::new(backend))
        }
    }
}
