use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use uuid::Uuid;

use super::events::{Advisory, ForwardEvent};
use super::session::{Session, SessionView};
use super::session_actor::{SessionActor, SessionCommand};
use super::supervisor::Supervisor;
use crate::configuration::types::TunnelSpec;
use crate::error_handling::types::{FailureKind, ForwardError, TunnelFailure};
use crate::network::port_probe;
use crate::output_classifier::{spawn_line_pump, OutputStream};
use crate::tunnel_process::{build_invocation, TunnelProcess};
use crate::SessionState;

/// Output lines buffered between the pumps and a session actor.
const LINE_BUFFER: usize = 64;

/// Tunables of the forward supervisor.
///
/// # Fields Overview
///
/// - `kubectl_path`: program launched for every forward.
/// - `connect_timeout`: how long a start waits for the success marker.
/// - `termination_grace`: SIGTERM to SIGKILL window when stopping.
/// - `event_buffer`: per-subscriber backlog of the change and advisory streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSettings {
    pub kubectl_path: String,
    pub connect_timeout: Duration,
    pub termination_grace: Duration,
    pub event_buffer: usize,
}

impl Default for ForwardSettings {
    fn default() -> Self {
        Self {
            kubectl_path: "kubectl".to_string(),
            connect_timeout: Duration::from_secs(10),
            termination_grace: Duration::from_secs(1),
            event_buffer: 64,
        }
    }
}

/// Entry point for starting, stopping and inspecting port forwards.
///
/// Cheap to clone; every clone drives the same registry. Nothing is global,
/// so several independent managers can coexist (the tests rely on that).
#[derive(Debug, Clone)]
pub struct ForwardManager {
    supervisor: Arc<Supervisor>,
}

impl ForwardManager {
    pub fn new(settings: ForwardSettings) -> Self {
        info!(
            "Forward manager using '{}' (connect timeout {:?}, grace {:?})",
            settings.kubectl_path, settings.connect_timeout, settings.termination_grace
        );
        Self {
            supervisor: Arc::new(Supervisor::new(settings)),
        }
    }

    pub fn settings(&self) -> &ForwardSettings {
        &self.supervisor.settings
    }

    /// Starts a forward and waits until it is established.
    ///
    /// Returns the existing view when an identical forward is already
    /// connected. Concurrent starts of the same forward are serialised, so
    /// at most one process runs per forward.
    pub async fn start_forward(&self, spec: TunnelSpec) -> Result<SessionView, ForwardError> {
        spec.validate()?;
        if self.supervisor.is_closed() {
            return Err(ForwardError::ManagerClosed);
        }

        let ticket = self.supervisor.start_gate(&spec.key());
        let _held = ticket.lock().await;
        self.start_exclusive(spec).await
    }

    async fn start_exclusive(&self, spec: TunnelSpec) -> Result<SessionView, ForwardError> {
        // Shutdown may have begun while this start waited on the gate.
        if self.supervisor.is_closed() {
            return Err(ForwardError::ManagerClosed);
        }
        let existing = self
            .supervisor
            .registry()
            .find_live_by_key(&spec.key())
            .map(|s| (s.id, s.state, s.view()));
        if let Some((id, state, view)) = existing {
            if state == SessionState::Connected {
                info!("[{}] Forward already connected, reusing it", id);
                return Ok(view);
            }
            debug!("[{}] Replacing forward stuck in {}", id, state);
            if let Err(e) = self.stop_forward(id).await {
                debug!("[{}] Ignoring failed stop of previous forward: {}", id, e);
            }
        }

        port_probe::ensure_available(spec.local_port).await?;

        let invocation = build_invocation(&spec, &self.supervisor.settings.kubectl_path);
        let mut process = TunnelProcess::spawn(&invocation)?;

        let (control_tx, control_rx) = mpsc::channel(1);
        let session = Session::new(spec.clone(), process.pid(), control_tx);
        let id = session.id;
        info!("[{}] Starting forward for {}", id, spec.target());

        let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);
        let (stdout, stderr) = process.take_output();
        if let Some(stdout) = stdout {
            spawn_line_pump(stdout, OutputStream::Stdout, line_tx.clone(), id.to_string());
        }
        if let Some(stderr) = stderr {
            spawn_line_pump(stderr, OutputStream::Stderr, line_tx, id.to_string());
        }

        if let Err(e) = self.supervisor.register(session) {
            // Shutdown already listed the sessions to stop; this one never ran.
            if let Err(term) = process.terminate(self.supervisor.settings.termination_grace).await {
                warn!("[{}] Unable to stop rejected forward process: {}", id, term);
            }
            return Err(e);
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let actor = SessionActor::new(
            id,
            spec.clone(),
            process,
            self.supervisor.clone(),
            control_rx,
            line_rx,
            ready_tx,
        );
        tokio::spawn(actor.run());

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(ForwardError::Tunnel(TunnelFailure {
                kind: FailureKind::ForwardFailed,
                target: spec.target(),
                message: "session ended without reporting an outcome".to_string(),
            })),
        }
    }

    /// Stops a forward and returns once its process is gone and it has been
    /// removed.
    pub async fn stop_forward(&self, id: Uuid) -> Result<(), ForwardError> {
        let control = self.supervisor.begin_stop(&id)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        if control
            .send(SessionCommand::Stop { reply: reply_tx })
            .await
            .is_err()
        {
            warn!("[{}] Session actor already gone", id);
        } else {
            match reply_rx.await {
                Ok(Ok(status)) => debug!("[{}] Forward process ended: {}", id, status),
                Ok(Err(e)) => warn!("[{}] Forward process did not stop cleanly: {}", id, e),
                Err(_) => warn!("[{}] Session actor dropped the stop request", id),
            }
        }

        self.supervisor.finish_teardown(&id);
        Ok(())
    }

    /// Stops every live forward concurrently. Individual failures are
    /// logged, never returned.
    pub async fn stop_all_forwards(&self) {
        let ids = self.supervisor.registry().live_ids();
        if ids.is_empty() {
            return;
        }
        info!("Stopping {} forward(s)", ids.len());

        let mut stops = JoinSet::new();
        for id in ids {
            let manager = self.clone();
            stops.spawn(async move { (id, manager.stop_forward(id).await) });
        }
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(ForwardError::NotFound(_)))) => {
                    debug!("[{}] Forward ended before it could be stopped", id)
                }
                Ok((id, Err(e))) => error!("[{}] Failed to stop forward: {}", id, e),
                Err(e) => error!("Stop task failed: {}", e),
            }
        }
    }

    /// Live forwards, oldest first.
    pub fn get_all_forwards(&self) -> Vec<SessionView> {
        self.supervisor.registry().live_views()
    }

    pub fn get_forward(&self, id: &Uuid) -> Option<SessionView> {
        self.supervisor.registry().live_view(id)
    }

    pub fn is_port_available(&self, port: u16) -> bool {
        port_probe::is_available(port)
    }

    pub fn find_next_available_port(&self, start: u16) -> Result<u16, ForwardError> {
        port_probe::find_next_available(start)
    }

    pub fn suggest_alternative_port(&self, port: u16) -> Option<u16> {
        port_probe::suggest_alternative(port)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ForwardEvent> {
        self.supervisor.notifier().subscribe()
    }

    pub fn subscribe_advisories(&self) -> broadcast::Receiver<Advisory> {
        self.supervisor.notifier().subscribe_advisories()
    }

    /// Rejects further starts and stops everything that is running.
    pub async fn shutdown(&self) {
        info!("Shutting down forward manager");
        self.supervisor.close();
        self.stop_all_forwards().await;
    }
}
