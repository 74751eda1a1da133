use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl LedgerError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the caller may retry after re-reading current state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Conflict(_))
    }
}

const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        let unique_violation = err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == UNIQUE_VIOLATION);
        if unique_violation {
            Self::Conflict(err.to_string())
        } else {
            Self::StoreUnavailable(err.to_string())
        }
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_and_conflict_errors_are_retryable() {
        assert!(LedgerError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(LedgerError::Conflict("stale".into()).is_retryable());
        assert!(!LedgerError::InvalidState("frozen".into()).is_retryable());
        assert!(!LedgerError::Validation("negative".into()).is_retryable());
        assert!(!LedgerError::not_found("student", "x").is_retryable());
    }

    #[test]
    fn row_not_found_maps_to_store_unavailable() {
        let err = LedgerError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
    }

    #[test]
    fn not_found_message_names_the_entity() {
        let err = LedgerError::not_found("certificate", "abc");
        assert_eq!(err.to_string(), "certificate not found: abc");
    }
}
