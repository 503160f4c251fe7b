use ccf_core::error::CoreError;

/// Errors raised by a [`MetadataStore`](crate::MetadataStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The record changed (or vanished) since it was read.
    #[error("{entity} '{id}' was modified concurrently")]
    VersionConflict { entity: &'static str, id: String },

    /// A uniqueness rule rejected the write.
    #[error("{entity} '{id}' already exists")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn version_conflict(entity: &'static str, id: impl Into<String>) -> Self {
        Self::VersionConflict {
            entity,
            id: id.into(),
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { entity, id } => {
                CoreError::TransientStore(format!("{entity} '{id}' is being modified concurrently"))
            }
            StoreError::AlreadyExists { entity, id } => {
                CoreError::Conflict(format!("{entity} '{id}' already exists"))
            }
            StoreError::Database(
                e @ (sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)),
            ) => CoreError::TransientStore(e.to_string()),
            StoreError::Database(e) => CoreError::Internal(format!("Database error: {e}")),
            StoreError::Corrupt(msg) => CoreError::Internal(format!("Corrupt record: {msg}")),
        }
    }
}

/// Map a PostgreSQL unique violation on a `uq_` index to
/// [`StoreError::AlreadyExists`]; pass everything else through.
pub(crate) fn classify_unique_violation(
    err: sqlx::Error,
    entity: &'static str,
    id: &str,
) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        // PostgreSQL unique constraint violation: error code 23505
        if db_err.code().as_deref() == Some("23505")
            && db_err.constraint().is_some_and(|c| c.starts_with("uq_"))
        {
            return StoreError::AlreadyExists {
                entity,
                id: id.to_string(),
            };
        }
    }
    StoreError::Database(err)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn version_conflict_surfaces_as_transient() {
        let err: CoreError = StoreError::version_conflict("job", "ccj-1").into();
        assert_matches!(err, CoreError::TransientStore(_));
    }

    #[test]
    fn pool_timeout_is_transient_other_db_errors_internal() {
        let err: CoreError = StoreError::Database(sqlx::Error::PoolTimedOut).into();
        assert_matches!(err, CoreError::TransientStore(_));

        let err: CoreError = StoreError::Database(sqlx::Error::RowNotFound).into();
        assert_matches!(err, CoreError::Internal(_));
    }

    #[test]
    fn already_exists_is_conflict() {
        let err: CoreError = StoreError::AlreadyExists {
            entity: "active job",
            id: "cc-1".into(),
        }
        .into();
        assert_matches!(err, CoreError::Conflict(_));
    }
}
