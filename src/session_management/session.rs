use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use super::session_actor::SessionCommand;
use crate::configuration::types::{ResourceKind, TunnelSpec};
use crate::SessionState;

/// Unmatched stderr lines kept per session.
pub const DIAGNOSTIC_LINES: usize = 20;

/// Registry record for one forward.
///
/// The subprocess itself is owned by the session's actor task; the record
/// keeps the command channel to that task, which is the only way to reach the
/// process.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub spec: TunnelSpec,
    pub os_process_id: Option<u32>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Set only together with `SessionState::Error`.
    pub last_error: Option<String>,
    pub diagnostics: VecDeque<String>,
    pub(crate) control: Sender<SessionCommand>,
}

impl Session {
    pub(crate) fn new(
        spec: TunnelSpec,
        os_process_id: Option<u32>,
        control: Sender<SessionCommand>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
            os_process_id,
            state: SessionState::Connecting,
            created_at: Utc::now(),
            last_activity_at: None,
            last_error: None,
            diagnostics: VecDeque::with_capacity(DIAGNOSTIC_LINES),
            control,
        }
    }

    /// Keeps the last [`DIAGNOSTIC_LINES`] lines.
    pub fn record_diagnostic(&mut self, line: &str) {
        if self.diagnostics.len() == DIAGNOSTIC_LINES {
            self.diagnostics.pop_front();
        }
        self.diagnostics.push_back(line.to_string());
    }

    /// Retained diagnostics joined into one line, oldest first.
    pub fn diagnostics_summary(&self) -> String {
        self.diagnostics
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" | ")
    }

    pub fn view(&self) -> SessionView {
        self.view_at(Utc::now())
    }

    pub fn view_at(&self, now: DateTime<Utc>) -> SessionView {
        SessionView {
            id: self.id,
            resource_kind: self.spec.resource_kind,
            resource_name: self.spec.resource_name.clone(),
            namespace: self.spec.namespace.clone(),
            cluster_context: self.spec.cluster_context.clone(),
            local_port: self.spec.local_port,
            remote_port: self.spec.remote_port,
            container_name: self.spec.container_name.clone(),
            os_process_id: self.os_process_id,
            state: self.state,
            uptime_seconds: (now - self.created_at).num_seconds().max(0) as u64,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only snapshot of a session handed to callers and subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub resource_kind: ResourceKind,
    pub resource_name: String,
    pub namespace: String,
    pub cluster_context: String,
    pub local_port: u16,
    pub remote_port: u16,
    pub container_name: Option<String>,
    pub os_process_id: Option<u32>,
    pub state: SessionState,
    pub uptime_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
