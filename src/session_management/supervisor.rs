use log::{debug, info, warn};
use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use super::events::{Advisory, AdvisoryKind, ChangeNotifier};
use super::forward_manager::ForwardSettings;
use super::registry::SessionRegistry;
use super::session::{Session, SessionView};
use super::session_actor::SessionCommand;
use crate::configuration::types::ForwardKey;
use crate::error_handling::types::ForwardError;
use crate::SessionState;

/// Shared core behind every [`ForwardManager`](super::ForwardManager) clone
/// and every session actor.
///
/// Registry mutations and the events they produce happen under the single
/// registry lock, so subscribers observe transitions in the order they were
/// applied and the lock is never held across an await.
#[derive(Debug)]
pub(crate) struct Supervisor {
    registry: Mutex<SessionRegistry>,
    notifier: ChangeNotifier,
    pub(crate) settings: ForwardSettings,
    start_gates: Mutex<HashMap<ForwardKey, Arc<tokio::sync::Mutex<()>>>>,
    closed: AtomicBool,
}

impl Supervisor {
    pub(crate) fn new(settings: ForwardSettings) -> Self {
        Self {
            registry: Mutex::new(SessionRegistry::new()),
            notifier: ChangeNotifier::new(settings.event_buffer),
            settings,
            start_gates: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Registry guard; a panicked holder cannot leave the map half-written,
    /// so poisoning is ignored.
    pub(crate) fn registry(&self) -> MutexGuard<'_, SessionRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Taken under the registry lock so that no registration can slip in
    /// after a shutdown has listed the sessions to stop.
    pub(crate) fn close(&self) {
        let _registry = self.registry();
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Makes a freshly spawned session visible. No event is emitted until it
    /// connects. Fails once the supervisor is closed.
    pub(crate) fn register(&self, session: Session) -> Result<(), ForwardError> {
        let mut registry = self.registry();
        if self.is_closed() {
            debug!("[{}] Rejected, supervisor is closed", session.id);
            return Err(ForwardError::ManagerClosed);
        }
        debug!("[{}] Registered in state {}", session.id, session.state);
        registry.insert(session);
        Ok(())
    }

    pub(crate) fn record_activity(&self, id: &Uuid, diagnostic: Option<&str>) {
        let mut registry = self.registry();
        registry.touch(id, chrono::Utc::now());
        if let Some(line) = diagnostic {
            registry.record_diagnostic(id, line);
        }
    }

    /// Connecting to Connected. Returns the new view, or `None` when the
    /// session is no longer connecting (already connected, or stopped).
    pub(crate) fn mark_connected(&self, id: &Uuid) -> Option<SessionView> {
        let mut registry = self.registry();
        match registry.transition(id, SessionState::Connected) {
            Ok(change) => {
                let view = registry.get(id).map(Session::view)?;
                if change.to.effects().emit_updated {
                    self.notifier.updated(&view);
                }
                self.notifier.added(&view);
                info!("[{}] Forward established on local port {}", id, view.local_port);
                Some(view)
            }
            Err(e) => {
                debug!("[{}] Ignoring connect marker: {}", id, e);
                None
            }
        }
    }

    /// Moves a live session to Error and raises the advisory. Returns `false`
    /// if the session had already left the live states; the caller must then
    /// not tear it down itself.
    pub(crate) fn mark_failed(&self, id: &Uuid, kind: AdvisoryKind, message: &str) -> bool {
        let mut registry = self.registry();
        let change = match registry.fail(id, message) {
            Ok(change) => change,
            Err(e) => {
                debug!("[{}] Ignoring failure '{}': {}", id, message, e);
                return false;
            }
        };
        let Some(session) = registry.get(id) else {
            return false;
        };
        warn!("[{}] Forward failed ({:?}): {}", id, kind, message);

        let effects = change.to.effects();
        if effects.emit_updated {
            self.notifier.updated(&session.view());
        }
        if effects.advise {
            self.notifier.advise(Advisory {
                session_id: *id,
                kind,
                message: message.to_string(),
                target: session.spec.target(),
            });
        }
        true
    }

    /// The process exited without a stop: remove the session right away.
    /// Returns the removed record, or `None` if a stop or failure got there
    /// first.
    pub(crate) fn mark_exited(&self, id: &Uuid, status: &ExitStatus) -> Option<Session> {
        let mut registry = self.registry();
        let change = match registry.transition(id, SessionState::Disconnected) {
            Ok(change) => change,
            Err(e) => {
                debug!("[{}] Ignoring exit ({}): {}", id, status, e);
                return None;
            }
        };
        let effects = change.to.effects();
        let session = if effects.remove_now {
            registry.remove(id)?
        } else {
            return None;
        };
        self.notifier.removed(*id);

        if status.success() {
            info!("[{}] Forward process exited: {}", id, status);
        } else {
            warn!("[{}] Forward process exited abnormally: {}", id, status);
            if effects.advise {
                self.notifier.advise(Advisory {
                    session_id: *id,
                    kind: AdvisoryKind::AbnormalExit,
                    message: format!("forward process exited unexpectedly ({})", status),
                    target: session.spec.target(),
                });
            }
        }
        Some(session)
    }

    /// Marks a live session Stopped and hands back its command channel.
    ///
    /// Sessions that are unknown or already terminal are reported as
    /// `NotFound`, which makes a second stop of the same id fail.
    pub(crate) fn begin_stop(&self, id: &Uuid) -> Result<Sender<SessionCommand>, ForwardError> {
        let mut registry = self.registry();
        let control = match registry.get(id) {
            Some(session) if session.state.is_live() => session.control.clone(),
            _ => return Err(ForwardError::NotFound(*id)),
        };
        registry
            .transition(id, SessionState::Stopped)
            .map_err(|_| ForwardError::NotFound(*id))?;
        info!("[{}] Stopping forward", id);
        Ok(control)
    }

    /// Last step of Error and Stopped: the process is gone, drop the record.
    pub(crate) fn finish_teardown(&self, id: &Uuid) {
        let mut registry = self.registry();
        if let Some(session) = registry.remove(id) {
            self.notifier.removed(*id);
            info!("[{}] Forward removed ({})", id, session.state);
        }
    }

    /// Ticket for the gate serialising starts for one key.
    pub(crate) fn start_gate(&self, key: &ForwardKey) -> GateTicket<'_> {
        let mut gates = self.start_gates.lock().unwrap_or_else(PoisonError::into_inner);
        let gate = gates.entry(key.clone()).or_default().clone();
        GateTicket {
            supervisor: self,
            key: key.clone(),
            gate,
        }
    }
}

/// A caller's claim on a start gate.
///
/// Dropping the ticket, whether the start finished or its future was
/// cancelled while queued, forgets the gate once nobody else holds it.
pub(crate) struct GateTicket<'a> {
    supervisor: &'a Supervisor,
    key: ForwardKey,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl GateTicket<'_> {
    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.gate.lock().await
    }
}

impl Drop for GateTicket<'_> {
    fn drop(&mut self) {
        let mut gates = self
            .supervisor
            .start_gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // The map's handle plus this ticket's: nobody else is queued.
        if gates.get(&self.key).is_some_and(|g| Arc::strong_count(g) == 2) {
            gates.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::{ResourceKind, TunnelSpec};
    use crate::session_management::events::ForwardEvent;
    use std::os::unix::process::ExitStatusExt;
    use tokio::sync::mpsc;

    fn spec(local_port: u16) -> TunnelSpec {
        TunnelSpec {
            resource_kind: ResourceKind::Pod,
            resource_name: "web-1".to_string(),
            namespace: "default".to_string(),
            cluster_context: "ctx-a".to_string(),
            local_port,
            remote_port: 80,
            container_name: None,
        }
    }

    fn registered(supervisor: &Supervisor) -> (Uuid, mpsc::Receiver<SessionCommand>) {
        let (tx, rx) = mpsc::channel(1);
        let session = Session::new(spec(9100), Some(1), tx);
        let id = session.id;
        supervisor.register(session).unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn connect_emits_updated_then_added() {
        let supervisor = Supervisor::new(ForwardSettings::default());
        let mut events = supervisor.notifier().subscribe();
        let (id, _rx) = registered(&supervisor);

        let view = supervisor.mark_connected(&id).unwrap();
        assert_eq!(view.state, SessionState::Connected);
        assert!(matches!(events.recv().await.unwrap(), ForwardEvent::Updated { .. }));
        assert!(matches!(events.recv().await.unwrap(), ForwardEvent::Added { .. }));

        assert!(supervisor.mark_connected(&id).is_none());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_suppresses_later_exit_and_failure() {
        let supervisor = Supervisor::new(ForwardSettings::default());
        let mut events = supervisor.notifier().subscribe();
        let mut advisories = supervisor.notifier().subscribe_advisories();
        let (id, _rx) = registered(&supervisor);

        supervisor.begin_stop(&id).unwrap();
        assert!(supervisor.mark_exited(&id, &ExitStatus::from_raw(256)).is_none());
        assert!(!supervisor.mark_failed(&id, AdvisoryKind::Timeout, "late"));
        assert!(events.try_recv().is_err());
        assert!(advisories.try_recv().is_err());

        supervisor.finish_teardown(&id);
        assert_eq!(events.recv().await.unwrap(), ForwardEvent::Removed { id });
        assert!(supervisor.registry().is_empty());
    }

    #[test]
    fn second_stop_is_not_found() {
        let supervisor = Supervisor::new(ForwardSettings::default());
        let (id, _rx) = registered(&supervisor);

        assert!(supervisor.begin_stop(&id).is_ok());
        assert!(matches!(
            supervisor.begin_stop(&id),
            Err(ForwardError::NotFound(found)) if found == id
        ));
        assert!(matches!(
            supervisor.begin_stop(&Uuid::new_v4()),
            Err(ForwardError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn abnormal_exit_removes_and_advises() {
        let supervisor = Supervisor::new(ForwardSettings::default());
        let mut events = supervisor.notifier().subscribe();
        let mut advisories = supervisor.notifier().subscribe_advisories();
        let (id, _rx) = registered(&supervisor);

        let removed = supervisor.mark_exited(&id, &ExitStatus::from_raw(256)).unwrap();
        assert_eq!(removed.state, SessionState::Disconnected);
        assert_eq!(events.recv().await.unwrap(), ForwardEvent::Removed { id });
        let advisory = advisories.recv().await.unwrap();
        assert_eq!(advisory.kind, AdvisoryKind::AbnormalExit);
        assert_eq!(advisory.target.local_port, 9100);
        assert!(supervisor.registry().is_empty());
    }

    #[tokio::test]
    async fn clean_exit_does_not_advise() {
        let supervisor = Supervisor::new(ForwardSettings::default());
        let mut advisories = supervisor.notifier().subscribe_advisories();
        let (id, _rx) = registered(&supervisor);

        assert!(supervisor.mark_exited(&id, &ExitStatus::from_raw(0)).is_some());
        assert!(advisories.try_recv().is_err());
    }

    #[tokio::test]
    async fn failure_keeps_record_until_teardown() {
        let supervisor = Supervisor::new(ForwardSettings::default());
        let mut events = supervisor.notifier().subscribe();
        let (id, _rx) = registered(&supervisor);

        assert!(supervisor.mark_failed(
            &id,
            AdvisoryKind::Failure(crate::error_handling::types::FailureKind::PermissionDenied),
            "pods \"web-1\" is forbidden"
        ));
        match events.recv().await.unwrap() {
            ForwardEvent::Updated { view, .. } => {
                assert_eq!(view.state, SessionState::Error);
                assert_eq!(view.last_error.as_deref(), Some("pods \"web-1\" is forbidden"));
            }
            other => panic!("expected updated, got {:?}", other),
        }
        assert_eq!(supervisor.registry().len(), 1);
        assert!(supervisor.registry().live_views().is_empty());

        supervisor.finish_teardown(&id);
        supervisor.finish_teardown(&id);
        assert_eq!(events.recv().await.unwrap(), ForwardEvent::Removed { id });
        assert!(events.try_recv().is_err());
    }

    fn gate_handles(supervisor: &Supervisor, key: &ForwardKey) -> usize {
        supervisor
            .start_gates
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, Arc::strong_count)
    }

    #[test]
    fn gates_are_shared_per_key_and_released() {
        let supervisor = Supervisor::new(ForwardSettings::default());
        let key = spec(9100).key();

        let first = supervisor.start_gate(&key);
        let second = supervisor.start_gate(&key);
        assert!(Arc::ptr_eq(&first.gate, &second.gate));

        drop(first);
        assert!(supervisor.start_gates.lock().unwrap().contains_key(&key));
        drop(second);
        assert!(supervisor.start_gates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_wait_on_a_gate_releases_it() {
        let supervisor = Arc::new(Supervisor::new(ForwardSettings::default()));
        let key = spec(9100).key();

        let holder = supervisor.start_gate(&key);
        let held = holder.lock().await;

        let waiter = {
            let supervisor = supervisor.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let ticket = supervisor.start_gate(&key);
                let _held = ticket.lock().await;
            })
        };
        while gate_handles(&supervisor, &key) < 3 {
            tokio::task::yield_now().await;
        }

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(gate_handles(&supervisor, &key), 2);

        drop(held);
        drop(holder);
        assert!(supervisor.start_gates.lock().unwrap().is_empty());
    }

    #[test]
    fn register_after_close_is_rejected() {
        let supervisor = Supervisor::new(ForwardSettings::default());
        supervisor.close();

        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new(spec(9100), Some(1), tx);
        assert!(matches!(
            supervisor.register(session),
            Err(ForwardError::ManagerClosed)
        ));
        assert!(supervisor.registry().is_empty());
    }
}
