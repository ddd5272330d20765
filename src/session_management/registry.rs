use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use super::session::{Session, SessionView};
use super::state_machine::{self, StateChange, TransitionError};
use crate::configuration::types::ForwardKey;
use crate::SessionState;

/// Map of session id to session record.
///
/// Holds no lock of its own; the supervisor wraps it so that every mutation
/// and the events it produces happen under one guard.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<Uuid, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.id, session);
    }

    pub fn get(&self, id: &Uuid) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Live session (Connecting or Connected) for the duplicate-resolution key.
    pub fn find_live_by_key(&self, key: &ForwardKey) -> Option<&Session> {
        self.sessions
            .values()
            .filter(|s| s.state.is_live())
            .find(|s| &s.spec.key() == key)
    }

    /// Applies `to` if the transition table allows it.
    pub fn transition(&mut self, id: &Uuid, to: SessionState) -> Result<StateChange, TransitionError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or(TransitionError::UnknownSession(*id))?;
        let change = state_machine::check(*id, session.state, to)?;
        session.state = to;
        Ok(change)
    }

    /// Moves the session to `Error` and records `message` as its last error.
    pub fn fail(&mut self, id: &Uuid, message: &str) -> Result<StateChange, TransitionError> {
        let change = self.transition(id, SessionState::Error)?;
        if let Some(session) = self.sessions.get_mut(id) {
            session.last_error = Some(message.to_string());
        }
        Ok(change)
    }

    pub fn touch(&mut self, id: &Uuid, at: DateTime<Utc>) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.last_activity_at = Some(at);
        }
    }

    pub fn record_diagnostic(&mut self, id: &Uuid, line: &str) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.record_diagnostic(line);
        }
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<Session> {
        self.sessions.remove(id)
    }

    /// Views of live sessions, oldest first.
    pub fn live_views(&self) -> Vec<SessionView> {
        let now = Utc::now();
        let mut views: Vec<SessionView> = self
            .sessions
            .values()
            .filter(|s| s.state.is_live())
            .map(|s| s.view_at(now))
            .collect();
        views.sort_by_key(|v| v.created_at);
        views
    }

    pub fn live_view(&self, id: &Uuid) -> Option<SessionView> {
        self.sessions
            .get(id)
            .filter(|s| s.state.is_live())
            .map(Session::view)
    }

    pub fn live_ids(&self) -> Vec<Uuid> {
        self.sessions
            .values()
            .filter(|s| s.state.is_live())
            .map(|s| s.id)
            .collect()
    }

    /// Every record, including ones in teardown.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
