use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;

use super::state::{CandidateState, Transition};
use crate::error::UpdateError;
use crate::source::SourceId;

/// Why a candidate was never started.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Filtered out by an exclusion rule.
    Excluded(String),
    /// Not among the ids the batch was asked to update.
    NotSelected,
    /// Confirmation was required and not given.
    NotConfirmed,
    /// The batch was cancelled before the candidate started.
    Cancelled,
    /// The source offering the update is not registered.
    SourceUnavailable(SourceId),
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::Excluded(_) => "excluded",
            SkipReason::NotSelected => "not_selected",
            SkipReason::NotConfirmed => "not_confirmed",
            SkipReason::Cancelled => "cancelled",
            SkipReason::SourceUnavailable(_) => "source_unavailable",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Excluded(why) => write!(f, "excluded: {}", why),
            SkipReason::NotSelected => write!(f, "not_selected: not part of this batch"),
            SkipReason::NotConfirmed => write!(f, "not_confirmed: update was not confirmed"),
            SkipReason::Cancelled => write!(f, "cancelled: batch was aborted before start"),
            SkipReason::SourceUnavailable(source) => {
                write!(f, "source_unavailable: {} is not available", source)
            }
        }
    }
}

/// Terminal result for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Success,
    Failed(UpdateError),
    /// The update did not stick and the pre-update state was restored (or,
    /// with `rollback_incomplete`, restoring was attempted).
    RolledBack(UpdateError),
    Skipped(SkipReason),
}

impl UpdateOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateOutcome::Success => "success",
            UpdateOutcome::Failed(_) => "failed",
            UpdateOutcome::RolledBack(_) => "rolled_back",
            UpdateOutcome::Skipped(_) => "skipped",
        }
    }

    /// Reason code, `None` for success.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            UpdateOutcome::Success => None,
            UpdateOutcome::Failed(e) | UpdateOutcome::RolledBack(e) => Some(e.code()),
            UpdateOutcome::Skipped(reason) => Some(reason.code()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UpdateOutcome::Success)
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Success => write!(f, "success"),
            UpdateOutcome::Failed(e) => write!(f, "failed ({})", e),
            UpdateOutcome::RolledBack(e) => write!(f, "rolled back ({})", e),
            UpdateOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
        }
    }
}

impl Serialize for UpdateOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let message = match self {
            UpdateOutcome::Success => None,
            UpdateOutcome::Failed(e) | UpdateOutcome::RolledBack(e) => Some(e.to_string()),
            UpdateOutcome::Skipped(reason) => Some(reason.to_string()),
        };
        let mut s = serializer.serialize_struct("UpdateOutcome", 3)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("code", &self.code())?;
        s.serialize_field("message", &message)?;
        s.end()
    }
}

/// Progress notification for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    Transition {
        canonical_id: String,
        from: CandidateState,
        to: CandidateState,
    },
    Outcome {
        canonical_id: String,
        display_name: String,
        outcome: UpdateOutcome,
    },
}

/// Everything that happened to one candidate in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub canonical_id: String,
    pub display_name: String,
    pub from_version: String,
    pub to_version: String,
    pub source: SourceId,
    pub state: CandidateState,
    pub outcome: UpdateOutcome,
    /// Number of apply invocations.
    pub attempts: u32,
    /// Timestamp of the backup record written for this candidate.
    pub backup: Option<DateTime<Utc>>,
    pub history: Vec<Transition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_codes() {
        assert_eq!(UpdateOutcome::Success.code(), None);
        assert_eq!(
            UpdateOutcome::Failed(UpdateError::BackupUnavailable("x".into())).code(),
            Some("backup_unavailable")
        );
        assert_eq!(
            UpdateOutcome::RolledBack(UpdateError::ApplyTimeout).kind(),
            "rolled_back"
        );
        assert_eq!(
            UpdateOutcome::Skipped(SkipReason::NotConfirmed).code(),
            Some("not_confirmed")
        );
    }

    #[test]
    fn test_outcome_json() {
        let json = serde_json::to_value(UpdateOutcome::RolledBack(UpdateError::ApplyTimeout)).unwrap();
        assert_eq!(json["kind"], "rolled_back");
        assert_eq!(json["code"], "apply_timeout");
        assert!(json["message"].as_str().unwrap().starts_with("apply_timeout"));

        let json = serde_json::to_value(UpdateOutcome::Success).unwrap();
        assert!(json["code"].is_null());
    }

    #[test]
    fn test_skip_display_starts_with_code() {
        let reasons = [
            SkipReason::Excluded("excluded keyword \"driver\"".into()),
            SkipReason::NotSelected,
            SkipReason::NotConfirmed,
            SkipReason::Cancelled,
            SkipReason::SourceUnavailable("scoop".into()),
        ];
        for reason in reasons {
            assert!(reason.to_string().starts_with(reason.code()), "{}", reason);
        }
    }
}
