//! Turn lifecycle state machine.
//!
//! Valid transitions:
//! - Idle -> Submitted (user turn recorded)
//! - Submitted -> Polling (run created)
//! - Polling -> Completed (reply appended)
//! - Submitted -> Failed, Polling -> Failed
//! - Completed -> Idle, Failed -> Idle

use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    Idle,
    Submitted,
    Polling,
    Completed,
    Failed,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnState::Idle => write!(f, "IDLE"),
            TurnState::Submitted => write!(f, "SUBMITTED"),
            TurnState::Polling => write!(f, "POLLING"),
            TurnState::Completed => write!(f, "COMPLETED"),
            TurnState::Failed => write!(f, "FAILED"),
        }
    }
}

impl TurnState {
    pub fn can_transition_to(&self, target: &TurnState) -> bool {
        matches!(
            (self, target),
            (TurnState::Idle, TurnState::Submitted)
                | (TurnState::Submitted, TurnState::Polling)
                | (TurnState::Polling, TurnState::Completed)
                | (TurnState::Submitted, TurnState::Failed)
                | (TurnState::Polling, TurnState::Failed)
                | (TurnState::Completed, TurnState::Idle)
                | (TurnState::Failed, TurnState::Idle)
        )
    }
}

#[derive(Debug, Error)]
#[error("invalid turn transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TurnState,
    pub to: TurnState,
}

/// Shared handle to the current turn state. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct TurnStateMachine {
    state: Arc<Mutex<TurnState>>,
}

impl Default for TurnStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnStateMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TurnState::Idle)),
        }
    }

    pub fn current(&self) -> TurnState {
        *self.state.lock().unwrap()
    }

    pub fn transition(&self, target: TurnState) -> Result<(), InvalidTransition> {
        let mut state = self.state.lock().unwrap();
        if state.can_transition_to(&target) {
            tracing::debug!("Turn state: {} -> {}", *state, target);
            *state = target;
            Ok(())
        } else {
            Err(InvalidTransition {
                from: *state,
                to: target,
            })
        }
    }

    /// Force the machine back to Idle.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        if *state != TurnState::Idle {
            tracing::warn!("Turn state reset to IDLE from {}", *state);
        }
        *state = TurnState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_paths() {
        assert!(TurnState::Idle.can_transition_to(&TurnState::Submitted));
        assert!(TurnState::Submitted.can_transition_to(&TurnState::Polling));
        assert!(TurnState::Polling.can_transition_to(&TurnState::Completed));
        assert!(TurnState::Polling.can_transition_to(&TurnState::Failed));
        assert!(TurnState::Submitted.can_transition_to(&TurnState::Failed));
        assert!(TurnState::Completed.can_transition_to(&TurnState::Idle));
        assert!(TurnState::Failed.can_transition_to(&TurnState::Idle));
    }

    #[test]
    fn test_invalid_paths() {
        assert!(!TurnState::Idle.can_transition_to(&TurnState::Polling));
        assert!(!TurnState::Idle.can_transition_to(&TurnState::Completed));
        assert!(!TurnState::Submitted.can_transition_to(&TurnState::Completed));
        assert!(!TurnState::Polling.can_transition_to(&TurnState::Submitted));
        assert!(!TurnState::Completed.can_transition_to(&TurnState::Failed));
        assert!(!TurnState::Polling.can_transition_to(&TurnState::Idle));
        assert!(!TurnState::Idle.can_transition_to(&TurnState::Idle));
    }

    #[test]
    fn test_machine_rejects_skip_and_keeps_state() {
        let sm = TurnStateMachine::new();
        let err = sm.transition(TurnState::Polling).unwrap_err();
        assert_eq!(err.to_string(), "invalid turn transition: IDLE -> POLLING");
        assert_eq!(sm.current(), TurnState::Idle);
    }

    #[test]
    fn test_machine_full_cycle_and_shared_clone() {
        let sm = TurnStateMachine::new();
        let observer = sm.clone();
        sm.transition(TurnState::Submitted).unwrap();
        sm.transition(TurnState::Polling).unwrap();
        assert_eq!(observer.current(), TurnState::Polling);
        sm.transition(TurnState::Failed).unwrap();
        sm.transition(TurnState::Idle).unwrap();
        assert_eq!(observer.current(), TurnState::Idle);
    }

    #[test]
    fn test_reset() {
        let sm = TurnStateMachine::new();
        sm.transition(TurnState::Submitted).unwrap();
        sm.reset();
        assert_eq!(sm.current(), TurnState::Idle);
    }
}
