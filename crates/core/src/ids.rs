//! Identifier generation.
//!
//! Connector and job ids are short, prefixed, and random:
//! `cc-` / `ccj-` followed by 12 lowercase hex characters taken from a
//! v4 UUID.

/// Prefix for connector identifiers.
pub const CONNECTOR_ID_PREFIX: &str = "cc-";

/// Prefix for job identifiers.
pub const JOB_ID_PREFIX: &str = "ccj-";

const RANDOM_SUFFIX_LEN: usize = 12;

/// Generate a fresh connector id, e.g. `cc-1f0c9a2b7d3e`.
pub fn new_connector_id() -> String {
    format!("{CONNECTOR_ID_PREFIX}{}", random_suffix())
}

/// Generate a fresh job id, e.g. `ccj-84be02d1aa90`.
pub fn new_job_id() -> String {
    format!("{JOB_ID_PREFIX}{}", random_suffix())
}

fn random_suffix() -> String {
    let mut hex = uuid::Uuid::new_v4().simple().to_string();
    hex.truncate(RANDOM_SUFFIX_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_id_has_prefix_and_hex_suffix() {
        let id = new_connector_id();
        let suffix = id.strip_prefix(CONNECTOR_ID_PREFIX).unwrap();
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn job_ids_are_unique() {
        let a = new_job_id();
        let b = new_job_id();
        assert!(a.starts_with(JOB_ID_PREFIX));
        assert_ne!(a, b);
    }
}
