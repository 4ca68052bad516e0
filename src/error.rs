use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("unrecognised {kind} '{value}'")]
pub struct ParseValueError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseValueError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Failures raised by a graph store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Connection-level failures that are worth one more attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout(_) => true,
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_)
            ),
        }
    }
}

/// Errors surfaced by the analysis pipeline to its callers.
#[derive(Debug, Error)]
pub enum CoachError {
    #[error("Student not found")]
    NotFound(String),

    #[error("{service} unavailable: {reason}")]
    UpstreamUnavailable {
        service: &'static str,
        reason: String,
    },

    #[error("{0}")]
    BadRequest(String),
}

impl CoachError {
    pub fn graph_store(err: StoreError) -> Self {
        CoachError::UpstreamUnavailable {
            service: "graph store",
            reason: err.to_string(),
        }
    }
}

/// Failures of the text-generation service. Never surfaced past the
/// insight composer.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation service returned status {0}")]
    Status(u16),

    #[error("generation request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed generation output: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_uses_public_message() {
        let err = CoachError::NotFound("XY12345".to_string());
        assert_eq!(err.to_string(), "Student not found");
    }

    #[test]
    fn timeouts_and_pool_exhaustion_are_transient() {
        assert!(StoreError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!StoreError::Database(sqlx::Error::ColumnNotFound("grade".to_string())).is_transient());
    }
}
