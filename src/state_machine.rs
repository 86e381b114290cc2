use serde::Serialize;
use std::fmt;

use crate::utils::logger::log_state_transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntitlementState {
    Unactivated,
    TrialActive,
    TrialExpired,
    FullActive,
    Revoked,
    /// Clock tampering was detected.
    Locked,
}

impl EntitlementState {
    pub fn is_entitled(&self) -> bool {
        matches!(self, Self::TrialActive | Self::FullActive)
    }

    /// States that end a session and send the user back to activation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TrialExpired | Self::Revoked | Self::Locked)
    }
}

#[derive(Debug, Clone)]
pub struct StateTransitionError {
    from: EntitlementState,
    to: EntitlementState,
}

impl fmt::Display for StateTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid entitlement transition from {:?} to {:?}",
            self.from, self.to
        )
    }
}

impl std::error::Error for StateTransitionError {}

/// Validated entitlement lifecycle
pub struct EntitlementLifecycle {
    current_state: EntitlementState,
}

impl Default for EntitlementLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl EntitlementLifecycle {
    pub fn new() -> Self {
        Self {
            current_state: EntitlementState::Unactivated,
        }
    }

    pub fn current(&self) -> EntitlementState {
        self.current_state
    }

    pub fn transition_to(&mut self, new_state: EntitlementState) -> Result<(), StateTransitionError> {
        let from = self.current_state;
        let valid = Self::is_valid_transition(from, new_state);
        log_state_transition("entitlement", &format!("{:?}", from), &format!("{:?}", new_state), valid);

        if !valid {
            return Err(StateTransitionError { from, to: new_state });
        }

        self.current_state = new_state;
        if new_state.is_terminal() && from != new_state {
            log::warn!("Entitlement ended: {:?} -> {:?}", from, new_state);
        }
        Ok(())
    }

    pub fn is_valid_transition(from: EntitlementState, to: EntitlementState) -> bool {
        use EntitlementState::*;

        match (from, to) {
            // Same state transitions (no-op)
            (a, b) if a == b => true,

            // Tampering locks from anywhere
            (_, Locked) => true,

            // Activation, including re-activation after the session ended
            (Unactivated | TrialExpired | Revoked | Locked, TrialActive | FullActive) => true,
            // Upgrade from trial
            (TrialActive, FullActive) => true,

            (TrialActive, TrialExpired) => true,
            (TrialActive | FullActive, Revoked) => true,

            // Explicit reset
            (_, Unactivated) => true,

            _ => false,
        }
    }

    /// Restore a state read from storage at startup.
    pub(crate) fn restore(&mut self, state: EntitlementState) {
        log::info!("Restoring entitlement state {:?}", state);
        self.current_state = state;
    }
}
