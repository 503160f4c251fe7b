/// Errors from an [`ExecutionBackend`](crate::ExecutionBackend).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Throttling, unavailability, or a timeout. Worth retrying.
    #[error("Backend temporarily unavailable: {0}")]
    Transient(String),

    /// The backend refused the request. Retrying will not help.
    #[error("Backend rejected request ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend has no record of the handle.
    #[error("Unknown backend job '{0}'")]
    UnknownJob(String),
}

impl BackendError {
    /// Whether a retry could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transient(_) => true,
            BackendError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            BackendError::Rejected { .. } | BackendError::UnknownJob(_) => false,
        }
    }
}
