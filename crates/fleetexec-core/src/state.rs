//! Run and unit state machines

use std::fmt;

use serde::Serialize;

/// Lifecycle of one host's unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl UnitState {
    /// Check if transition to target state is valid
    #[must_use]
    pub fn can_transition_to(self, target: UnitState) -> bool {
        matches!(
            (self, target),
            (UnitState::Pending, UnitState::Running)
                | (UnitState::Running, UnitState::Succeeded | UnitState::Failed)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Succeeded | UnitState::Failed)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitState::Pending => "pending",
            UnitState::Running => "running",
            UnitState::Succeeded => "succeeded",
            UnitState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    /// Every scheduled unit ran; some may have failed
    Completed,
    /// A sequential run stopped early
    Aborted,
}

impl RunState {
    /// Check if transition to target state is valid
    #[must_use]
    pub fn can_transition_to(self, target: RunState) -> bool {
        matches!(
            (self, target),
            (RunState::Idle, RunState::Running)
                | (RunState::Running, RunState::Completed | RunState::Aborted)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_transitions() {
        assert!(UnitState::Pending.can_transition_to(UnitState::Running));
        assert!(UnitState::Running.can_transition_to(UnitState::Succeeded));
        assert!(UnitState::Running.can_transition_to(UnitState::Failed));

        assert!(!UnitState::Pending.can_transition_to(UnitState::Succeeded));
        assert!(!UnitState::Failed.can_transition_to(UnitState::Running));
        assert!(!UnitState::Succeeded.can_transition_to(UnitState::Failed));
    }

    #[test]
    fn test_run_transitions() {
        assert!(RunState::Idle.can_transition_to(RunState::Running));
        assert!(RunState::Running.can_transition_to(RunState::Aborted));
        assert!(!RunState::Completed.can_transition_to(RunState::Running));
        assert!(!RunState::Idle.can_transition_to(RunState::Completed));
    }
}
