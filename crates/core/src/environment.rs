//! Container environment assembly.
//!
//! The environment handed to the execution backend is the orchestrator's
//! own variables followed by the caller's, in the order supplied.

use std::collections::HashSet;

use crate::error::CoreError;
use crate::job::{EnvironmentVariable, Job};

/// Prefix reserved for orchestrator-injected variables.
pub const RESERVED_PREFIX: &str = "CCF_";

pub const JOB_ID_VAR: &str = "CCF_JOB_ID";
pub const CONNECTOR_ID_VAR: &str = "CCF_CONNECTOR_ID";
pub const API_ENDPOINT_VAR: &str = "CCF_API_ENDPOINT";

/// Check a caller-supplied environment before admission.
pub fn validate_caller_environment(environment: &[EnvironmentVariable]) -> Result<(), CoreError> {
    let mut seen = HashSet::new();
    let mut errors = Vec::new();

    for (index, var) in environment.iter().enumerate() {
        if var.name.trim().is_empty() {
            errors.push(format!("environment[{index}].name must not be empty"));
            continue;
        }
        if var.name.starts_with(RESERVED_PREFIX) {
            errors.push(format!(
                "environment variable '{}' uses the reserved prefix '{RESERVED_PREFIX}'",
                var.name
            ));
        }
        if !seen.insert(var.name.as_str()) {
            errors.push(format!("environment variable '{}' is duplicated", var.name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CoreError::Validation(errors.join("; ")))
    }
}

/// Build the full container environment for `job`.
pub fn build_container_environment(
    job: &Job,
    api_endpoint: Option<&str>,
) -> Vec<EnvironmentVariable> {
    let mut env = Vec::with_capacity(job.environment.len() + 3);
    env.push(EnvironmentVariable::new(JOB_ID_VAR, &job.job_id));
    env.push(EnvironmentVariable::new(CONNECTOR_ID_VAR, &job.connector_id));
    if let Some(endpoint) = api_endpoint {
        env.push(EnvironmentVariable::new(API_ENDPOINT_VAR, endpoint));
    }
    env.extend(job.environment.iter().cloned());
    env
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    fn var(name: &str) -> EnvironmentVariable {
        EnvironmentVariable::new(name, "x")
    }

    #[test]
    fn empty_environment_is_valid() {
        assert!(validate_caller_environment(&[]).is_ok());
    }

    #[test]
    fn reserved_prefix_is_rejected() {
        assert_matches!(
            validate_caller_environment(&[var("CCF_JOB_ID")]),
            Err(CoreError::Validation(msg)) if msg.contains("reserved")
        );
    }

    #[test]
    fn duplicates_and_blank_names_are_rejected() {
        let err = validate_caller_environment(&[var("A"), var(" "), var("A")])
            .unwrap_err()
            .to_string();
        assert!(err.contains("environment[1].name"));
        assert!(err.contains("duplicated"));
    }

    #[test]
    fn injected_variables_come_first() {
        let job = Job::new("cc-abc", vec![var("MODE"), var("DEPTH")], Utc::now());
        let env = build_container_environment(&job, Some("https://ccf.example.com"));

        let names: Vec<_> = env.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            names,
            ["CCF_JOB_ID", "CCF_CONNECTOR_ID", "CCF_API_ENDPOINT", "MODE", "DEPTH"]
        );
        assert_eq!(env[0].value, job.job_id);
        assert_eq!(env[1].value, "cc-abc");
    }

    #[test]
    fn api_endpoint_is_optional() {
        let job = Job::new("cc-abc", Vec::new(), Utc::now());
        let env = build_container_environment(&job, None);
        assert_eq!(env.len(), 2);
    }
}
