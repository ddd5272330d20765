use std::fmt;
use uuid::Uuid;

use super::SessionState;

/// Side effects that accompany entering a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effects {
    /// Publish an `updated` event with the new view.
    pub emit_updated: bool,
    /// The subprocess must still be terminated before the session is removed.
    pub teardown: bool,
    /// Remove from the registry as part of the transition itself.
    pub remove_now: bool,
    /// Raise an advisory for the alert collaborator.
    pub advise: bool,
}

impl SessionState {
    /// Terminal states are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Disconnected | SessionState::Error | SessionState::Stopped
        )
    }

    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Disconnected)
                | (Connecting, Stopped)
                | (Connected, Error)
                | (Connected, Disconnected)
                | (Connected, Stopped)
        )
    }

    /// Effects of entering `self`.
    ///
    /// `Disconnected` advises only for abnormal exits; the caller decides that.
    pub fn effects(&self) -> Effects {
        match self {
            SessionState::Connecting => Effects {
                emit_updated: false,
                teardown: false,
                remove_now: false,
                advise: false,
            },
            SessionState::Connected => Effects {
                emit_updated: true,
                teardown: false,
                remove_now: false,
                advise: false,
            },
            SessionState::Error => Effects {
                emit_updated: true,
                teardown: true,
                remove_now: false,
                advise: true,
            },
            SessionState::Disconnected => Effects {
                emit_updated: false,
                teardown: false,
                remove_now: true,
                advise: true,
            },
            SessionState::Stopped => Effects {
                emit_updated: false,
                teardown: true,
                remove_now: false,
                advise: false,
            },
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Error => "error",
            SessionState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// An applied transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: SessionState,
    pub to: SessionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    UnknownSession(Uuid),
    Rejected {
        id: Uuid,
        from: SessionState,
        to: SessionState,
    },
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::UnknownSession(id) => write!(f, "Session {} is not registered", id),
            TransitionError::Rejected { id, from, to } => {
                write!(f, "Session {} cannot move from {} to {}", id, from, to)
            }
        }
    }
}

impl std::error::Error for TransitionError {}

/// Checks `from -> to` against the transition table.
pub fn check(id: Uuid, from: SessionState, to: SessionState) -> Result<StateChange, TransitionError> {
    if from.can_transition_to(to) {
        Ok(StateChange { from, to })
    } else {
        Err(TransitionError::Rejected { id, from, to })
    }
}
