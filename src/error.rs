//! Failure taxonomy for sources and per-candidate update processing.
//!
//! None of these errors abort a batch. Batch-fatal problems (unreadable
//! configuration, a backup store that cannot be initialized) are plain
//! `anyhow::Error`s returned before any candidate is touched.

use std::fmt;

/// Errors reported by a source adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The underlying tool is missing or could not be queried.
    Unavailable(String),
    /// The operation did not finish within its time budget.
    Timeout,
    /// The tool ran but reported failure.
    Failed(String),
    /// The source has no mechanism for the requested operation.
    Unsupported(&'static str),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Unavailable(msg) => write!(f, "source unavailable: {}", msg),
            SourceError::Timeout => write!(f, "operation timed out"),
            SourceError::Failed(msg) => write!(f, "{}", msg),
            SourceError::Unsupported(op) => write!(f, "source does not support {}", op),
        }
    }
}

impl std::error::Error for SourceError {}

/// Why a candidate did not end in `Success`.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateError {
    /// The Backup Store could not durably record the pre-update state.
    BackupUnavailable(String),
    /// The apply step exceeded the per-item timeout.
    ApplyTimeout,
    /// The apply mechanism reported failure.
    ApplyFailed(String),
    /// After applying, the installed version is still below the target.
    VerifyMismatch {
        expected: String,
        found: Option<String>,
    },
    /// Restoring the pre-update state did not succeed; manual action needed.
    RollbackIncomplete(String),
    /// The batch was cancelled while this candidate was in flight.
    Cancelled,
}

impl UpdateError {
    /// Stable machine-readable code, used in logs and reports.
    pub fn code(&self) -> &'static str {
        match self {
            UpdateError::BackupUnavailable(_) => "backup_unavailable",
            UpdateError::ApplyTimeout => "apply_timeout",
            UpdateError::ApplyFailed(_) => "apply_failed",
            UpdateError::VerifyMismatch { .. } => "verify_mismatch",
            UpdateError::RollbackIncomplete(_) => "rollback_incomplete",
            UpdateError::Cancelled => "cancelled",
        }
    }

    /// Whether the apply step may be attempted again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpdateError::ApplyTimeout
                | UpdateError::ApplyFailed(_)
                | UpdateError::VerifyMismatch { .. }
        )
    }
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::BackupUnavailable(msg) => {
                write!(f, "backup_unavailable: could not record pre-update state ({})", msg)
            }
            UpdateError::ApplyTimeout => write!(f, "apply_timeout: update did not finish in time"),
            UpdateError::ApplyFailed(msg) => write!(f, "apply_failed: {}", msg),
            UpdateError::VerifyMismatch { expected, found } => write!(
                f,
                "verify_mismatch: expected at least {}, found {}",
                expected,
                found.as_deref().unwrap_or("nothing installed")
            ),
            UpdateError::RollbackIncomplete(msg) => write!(
                f,
                "rollback_incomplete: {}. Manual intervention may be required.",
                msg
            ),
            UpdateError::Cancelled => write!(f, "cancelled: batch was aborted"),
        }
    }
}

impl std::error::Error for UpdateError {}

impl From<SourceError> for UpdateError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Timeout => UpdateError::ApplyTimeout,
            other => UpdateError::ApplyFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(UpdateError::BackupUnavailable("x".into()).code(), "backup_unavailable");
        assert_eq!(UpdateError::ApplyTimeout.code(), "apply_timeout");
        assert_eq!(UpdateError::ApplyFailed("x".into()).code(), "apply_failed");
        assert_eq!(
            UpdateError::VerifyMismatch {
                expected: "2".into(),
                found: None
            }
            .code(),
            "verify_mismatch"
        );
        assert_eq!(UpdateError::RollbackIncomplete("x".into()).code(), "rollback_incomplete");
        assert_eq!(UpdateError::Cancelled.code(), "cancelled");
    }

    #[test]
    fn test_display_starts_with_code() {
        let errors = [
            UpdateError::BackupUnavailable("disk full".into()),
            UpdateError::ApplyTimeout,
            UpdateError::ApplyFailed("exit code 1".into()),
            UpdateError::RollbackIncomplete("installer missing".into()),
            UpdateError::Cancelled,
        ];
        for err in errors {
            assert!(err.to_string().starts_with(err.code()), "{}", err);
        }
    }

    #[test]
    fn test_verify_mismatch_display() {
        let err = UpdateError::VerifyMismatch {
            expected: "102.0".into(),
            found: Some("101.0".into()),
        };
        assert_eq!(
            err.to_string(),
            "verify_mismatch: expected at least 102.0, found 101.0"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(UpdateError::ApplyTimeout.is_retryable());
        assert!(UpdateError::ApplyFailed("x".into()).is_retryable());
        assert!(!UpdateError::BackupUnavailable("x".into()).is_retryable());
        assert!(!UpdateError::Cancelled.is_retryable());
        assert!(!UpdateError::RollbackIncomplete("x".into()).is_retryable());
    }

    #[test]
    fn test_source_error_conversion() {
        assert_eq!(UpdateError::from(SourceError::Timeout), UpdateError::ApplyTimeout);
        let err = UpdateError::from(SourceError::Unsupported("apply"));
        assert_eq!(err.code(), "apply_failed");
        assert!(err.to_string().contains("does not support apply"));
    }
}
