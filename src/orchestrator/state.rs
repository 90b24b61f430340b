//! Per-candidate state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateState {
    Pending,
    BackingUp,
    Applying,
    Verifying,
    Committed,
    Failed,
    RollingBack,
    RolledBack,
}

impl CandidateState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CandidateState::Committed | CandidateState::Failed | CandidateState::RolledBack
        )
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// `Applying -> Applying` and `Verifying -> Applying` are retries.
    pub fn can_transition_to(self, next: CandidateState) -> bool {
        use CandidateState::*;
        matches!(
            (self, next),
            (Pending, BackingUp)
                | (BackingUp, Applying)
                | (BackingUp, Failed)
                | (Applying, Applying)
                | (Applying, Verifying)
                | (Applying, Failed)
                | (Applying, RollingBack)
                | (Verifying, Committed)
                | (Verifying, Applying)
                | (Verifying, Failed)
                | (Verifying, RollingBack)
                | (RollingBack, RolledBack)
        )
    }
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CandidateState::Pending => "pending",
            CandidateState::BackingUp => "backing-up",
            CandidateState::Applying => "applying",
            CandidateState::Verifying => "verifying",
            CandidateState::Committed => "committed",
            CandidateState::Failed => "failed",
            CandidateState::RollingBack => "rolling-back",
            CandidateState::RolledBack => "rolled-back",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvalidTransition {
    pub from: CandidateState,
    pub to: CandidateState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub from: CandidateState,
    pub to: CandidateState,
    pub at: DateTime<Utc>,
}

/// Current state of one candidate plus every transition it went through.
#[derive(Debug, Clone, Serialize)]
pub struct StateMachine {
    state: CandidateState,
    history: Vec<Transition>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: CandidateState::Pending,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> CandidateState {
        self.state
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn advance(&mut self, to: CandidateState) -> Result<&Transition, InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.history.push(Transition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
        Ok(&self.history[self.history.len() - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CandidateState::*;

    const ALL: [CandidateState; 8] = [
        Pending,
        BackingUp,
        Applying,
        Verifying,
        Committed,
        Failed,
        RollingBack,
        RolledBack,
    ];

    #[test]
    fn test_happy_path() {
        let mut sm = StateMachine::new();
        for next in [BackingUp, Applying, Verifying, Committed] {
            sm.advance(next).unwrap();
        }
        assert_eq!(sm.state(), Committed);
        assert_eq!(sm.history().len(), 4);
        assert_eq!(sm.history()[0].from, Pending);
    }

    #[test]
    fn test_retry_then_rollback_path() {
        let mut sm = StateMachine::new();
        for next in [BackingUp, Applying, Applying, Verifying, Applying, RollingBack, RolledBack] {
            sm.advance(next).unwrap();
        }
        assert_eq!(sm.history().iter().filter(|t| t.to == Applying).count(), 3);
        assert!(sm.state().is_terminal());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in [Committed, Failed, RolledBack] {
            assert!(from.is_terminal());
            for to in ALL {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_pending_only_enters_backing_up() {
        for to in ALL {
            assert_eq!(Pending.can_transition_to(to), to == BackingUp, "{}", to);
        }
    }

    #[test]
    fn test_rollback_requires_applying_first() {
        assert!(!BackingUp.can_transition_to(RollingBack));
        assert!(!Pending.can_transition_to(RolledBack));
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut sm = StateMachine::new();
        let err = sm.advance(Applying).unwrap_err();
        assert_eq!(err.to_string(), "invalid transition pending -> applying");
        assert_eq!(sm.state(), Pending);
        assert!(sm.history().is_empty());
    }
}
