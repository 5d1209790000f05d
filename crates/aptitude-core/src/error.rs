//! Error types for data-service access and per-subject processing.
//!
//! `DataError` is defined here rather than in `aptitude-store` so the
//! batch generator and integrity checker can downcast and classify
//! failures as systemic without string matching.

use thiserror::Error;

/// Failures reported by a [`DataService`](crate::traits::DataService).
#[derive(Debug, Error)]
pub enum DataError {
    /// The data service could not be reached.
    #[error("data service unavailable: {0}")]
    Unavailable(String),

    /// The request timed out.
    #[error("data service request timed out after {0}s")]
    Timeout(u64),

    /// The collection (table) does not exist on the data service.
    #[error("collection not found: {0}")]
    MissingCollection(String),

    /// Credentials were rejected.
    #[error("data service rejected credentials: {0}")]
    Unauthorized(String),

    /// The data service refused the request.
    #[error("data service error (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// A row could not be decoded into the expected record shape.
    #[error("failed to decode row from '{table}': {message}")]
    Decode { table: String, message: String },
}

impl DataError {
    /// Returns `true` if no partial result can be trusted after this error.
    pub fn is_systemic(&self) -> bool {
        matches!(
            self,
            DataError::Unavailable(_)
                | DataError::Timeout(_)
                | DataError::MissingCollection(_)
                | DataError::Unauthorized(_)
        )
    }
}

/// Returns `true` if `err` wraps a systemic [`DataError`] anywhere in its chain.
pub fn is_systemic_error(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<DataError>())
        .any(DataError::is_systemic)
}

/// Per-subject failures during report generation.
///
/// These are caught at the subject boundary by the batch generator and
/// recorded rather than aborting the run.
#[derive(Debug, Error)]
pub enum SubjectError {
    #[error("subject {0} not found")]
    SubjectNotFound(String),

    #[error("subject {subject_id} has incomplete identity: missing {missing}")]
    IncompleteIdentity { subject_id: String, missing: String },

    #[error("no results available for subject {0}")]
    NoResults(String),

    #[error("no valid results for subject {subject_id} ({invalid} invalid)")]
    NoValidResults { subject_id: String, invalid: usize },

    #[error("failed to persist report for subject {subject_id}: {message}")]
    Persist { subject_id: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn systemic_classification() {
        assert!(DataError::Unavailable("down".into()).is_systemic());
        assert!(DataError::MissingCollection("results".into()).is_systemic());
        assert!(!DataError::Rejected {
            status: 409,
            message: "conflict".into()
        }
        .is_systemic());
        assert!(!DataError::Decode {
            table: "results".into(),
            message: "bad".into()
        }
        .is_systemic());
    }

    #[test]
    fn systemic_detected_through_context() {
        let err = anyhow::Error::new(DataError::Timeout(30)).context("loading results");
        assert!(is_systemic_error(&err));

        let err = anyhow::Error::new(SubjectError::NoResults("s1".into()));
        assert!(!is_systemic_error(&err));
    }
}
