use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::OverallStatus;

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    PartiallyFailed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal run state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

impl RunState {
    pub fn allowed_transitions(&self) -> &'static [RunState] {
        use RunState::*;
        match self {
            Idle => &[Running],
            Running => &[Completed, PartiallyFailed, Failed],
            Completed | PartiallyFailed | Failed => &[],
        }
    }

    pub fn can_transition_to(&self, target: RunState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn advance(self, target: RunState) -> Result<RunState, InvalidTransition> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(InvalidTransition {
                from: self,
                to: target,
            })
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Terminal state matching a finished run's status.
    pub fn terminal_for(status: OverallStatus) -> RunState {
        match status {
            OverallStatus::Success => RunState::Completed,
            OverallStatus::Partial => RunState::PartiallyFailed,
            OverallStatus::Failed => RunState::Failed,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "Idle",
            RunState::Running => "Running",
            RunState::Completed => "Completed",
            RunState::PartiallyFailed => "PartiallyFailed",
            RunState::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_path() {
        let state = RunState::Idle.advance(RunState::Running).unwrap();
        let state = state.advance(RunState::PartiallyFailed).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(RunState::Idle.advance(RunState::Completed).is_err());
        let err = RunState::Failed.advance(RunState::Running).unwrap_err();
        assert_eq!(err.to_string(), "illegal run state transition Failed -> Running");
        assert!(!RunState::Running.can_transition_to(RunState::Idle));
    }

    #[test]
    fn test_terminal_for_status() {
        assert_eq!(RunState::terminal_for(OverallStatus::Success), RunState::Completed);
        assert_eq!(RunState::terminal_for(OverallStatus::Partial), RunState::PartiallyFailed);
        assert_eq!(RunState::terminal_for(OverallStatus::Failed), RunState::Failed);
    }
}
