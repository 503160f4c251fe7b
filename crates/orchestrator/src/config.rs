use std::time::Duration;

use ccf_core::config::{env_opt, env_or, ConfigError};
use ccf_core::retry::RetryPolicy;

/// Tuning for admission, dispatch, completion polling and retention.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Backoff for backend submit and cancel calls.
    pub dispatch_retry: RetryPolicy,
    /// Pacing for read-modify-write loops that lose a version race. Once
    /// exhausted the conflict is surfaced as a transient store error.
    pub store_retry: RetryPolicy,
    /// How long a dispatch claim shields a job from other deliveries.
    pub claim_lease: chrono::Duration,
    pub rescan_interval: Duration,
    pub completion_poll_interval: Duration,
    /// How long terminal jobs are kept before the sweeper deletes them.
    pub job_retention: chrono::Duration,
    pub retention_sweep_interval: Duration,
    /// Injected into every job as `CCF_API_ENDPOINT` when set.
    pub api_endpoint: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dispatch_retry: RetryPolicy::default(),
            store_retry: RetryPolicy {
                max_attempts: 5,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(500),
                multiplier: 2.0,
                jitter: true,
            },
            claim_lease: chrono::Duration::seconds(300),
            rescan_interval: Duration::from_secs(30),
            completion_poll_interval: Duration::from_secs(60),
            job_retention: chrono::Duration::days(7),
            retention_sweep_interval: Duration::from_secs(3600),
            api_endpoint: None,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default |
    /// |---------------------------------|---------|
    /// | `DISPATCH_MAX_ATTEMPTS`         | `5`     |
    /// | `DISPATCH_INITIAL_BACKOFF_MS`   | `200`   |
    /// | `DISPATCH_MAX_BACKOFF_MS`       | `10000` |
    /// | `DISPATCH_BACKOFF_MULTIPLIER`   | `2.0`   |
    /// | `STORE_MAX_ATTEMPTS`            | `5`     |
    /// | `STORE_INITIAL_BACKOFF_MS`      | `10`    |
    /// | `STORE_MAX_BACKOFF_MS`          | `500`   |
    /// | `DISPATCH_CLAIM_LEASE_SECS`     | `300`   |
    /// | `RESCAN_INTERVAL_SECS`          | `30`    |
    /// | `COMPLETION_POLL_INTERVAL_SECS` | `60`    |
    /// | `JOB_RETENTION_DAYS`            | `7`     |
    /// | `RETENTION_SWEEP_INTERVAL_SECS` | `3600`  |
    /// | `CCF_API_ENDPOINT`              | (none)  |
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_attempts: u32 = env_or("DISPATCH_MAX_ATTEMPTS", 5)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "DISPATCH_MAX_ATTEMPTS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        let multiplier: f64 = env_or("DISPATCH_BACKOFF_MULTIPLIER", 2.0)?;
        if multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                var: "DISPATCH_BACKOFF_MULTIPLIER",
                value: multiplier.to_string(),
                reason: "must be at least 1.0".into(),
            });
        }

        Ok(Self {
            dispatch_retry: RetryPolicy {
                max_attempts,
                initial_delay: Duration::from_millis(env_or("DISPATCH_INITIAL_BACKOFF_MS", 200)?),
                max_delay: Duration::from_millis(env_or("DISPATCH_MAX_BACKOFF_MS", 10_000)?),
                multiplier,
                jitter: true,
            },
            store_retry: RetryPolicy {
                max_attempts: env_or("STORE_MAX_ATTEMPTS", 5u32)?.max(1),
                initial_delay: Duration::from_millis(env_or("STORE_INITIAL_BACKOFF_MS", 10)?),
                max_delay: Duration::from_millis(env_or("STORE_MAX_BACKOFF_MS", 500)?),
                multiplier: 2.0,
                jitter: true,
            },
            claim_lease: chrono::Duration::seconds(env_or("DISPATCH_CLAIM_LEASE_SECS", 300)?),
            rescan_interval: Duration::from_secs(env_or("RESCAN_INTERVAL_SECS", 30)?),
            completion_poll_interval: Duration::from_secs(env_or(
                "COMPLETION_POLL_INTERVAL_SECS",
                60,
            )?),
            job_retention: chrono::Duration::days(env_or("JOB_RETENTION_DAYS", 7)?),
            retention_sweep_interval: Duration::from_secs(env_or(
                "RETENTION_SWEEP_INTERVAL_SECS",
                3600,
            )?),
            api_endpoint: env_opt("CCF_API_ENDPOINT"),
        })
    }
}
