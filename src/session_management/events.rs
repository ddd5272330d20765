use log::trace;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::session::SessionView;
use crate::configuration::types::ForwardTarget;
use crate::error_handling::types::FailureKind;

/// Change to the set of forwards, in per-session transition order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ForwardEvent {
    Added { id: Uuid, view: SessionView },
    Updated { id: Uuid, view: SessionView },
    Removed { id: Uuid },
}

impl ForwardEvent {
    pub fn id(&self) -> Uuid {
        match self {
            ForwardEvent::Added { id, .. }
            | ForwardEvent::Updated { id, .. }
            | ForwardEvent::Removed { id } => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdvisoryKind {
    AbnormalExit,
    Failure(FailureKind),
    Timeout,
}

/// User-facing alert about a forward that went away on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advisory {
    pub session_id: Uuid,
    pub kind: AdvisoryKind,
    pub message: String,
    pub target: ForwardTarget,
}

/// Broadcasts change events and advisories to any number of subscribers.
///
/// Sends never block; a subscriber that falls behind by more than the buffer
/// size sees `RecvError::Lagged` and misses the overwritten events.
#[derive(Debug)]
pub struct ChangeNotifier {
    events: broadcast::Sender<ForwardEvent>,
    advisories: broadcast::Sender<Advisory>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (events, _) = broadcast::channel(capacity);
        let (advisories, _) = broadcast::channel(capacity);
        Self { events, advisories }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ForwardEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_advisories(&self) -> broadcast::Receiver<Advisory> {
        self.advisories.subscribe()
    }

    pub fn added(&self, view: &SessionView) {
        self.publish(ForwardEvent::Added {
            id: view.id,
            view: view.clone(),
        });
    }

    pub fn updated(&self, view: &SessionView) {
        self.publish(ForwardEvent::Updated {
            id: view.id,
            view: view.clone(),
        });
    }

    pub fn removed(&self, id: Uuid) {
        self.publish(ForwardEvent::Removed { id });
    }

    pub fn advise(&self, advisory: Advisory) {
        if self.advisories.send(advisory).is_err() {
            trace!("Advisory dropped, no subscribers");
        }
    }

    fn publish(&self, event: ForwardEvent) {
        if self.events.send(event).is_err() {
            trace!("Forward event dropped, no subscribers");
        }
    }
}
