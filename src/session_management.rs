//! Port-forward session management.
//!
//! This module holds the supervisor core: the session records and their state
//! machine, the registry that is the single source of truth for active
//! forwards, the change notifier, the per-session actor that owns each
//! subprocess, and the [`ForwardManager`] facade composing them.
//!
//! ```text
//! start_forward ──▶ ForwardManager ──spawn──▶ SessionActor ──owns──▶ kubectl port-forward
//!                        │                        │  stdout/stderr lines
//!                        ▼                        ▼
//!                   Supervisor ◀── transitions ── classifier
//!                   (registry + notifier, one lock)
//! ```

use serde::{Deserialize, Serialize};

/// Submodule with the change event stream and advisories.
pub mod events;
/// Submodule with the facade.
pub mod forward_manager;
/// Submodule with the session registry.
pub mod registry;
/// Submodule with session records and views.
pub mod session;
pub(crate) mod session_actor;
/// Submodule with the transition table.
pub mod state_machine;
pub(crate) mod supervisor;


pub use events::{Advisory, AdvisoryKind, ChangeNotifier, ForwardEvent};
pub use forward_manager::{ForwardManager, ForwardSettings};
pub use registry::SessionRegistry;
pub use session::{Session, SessionView};
pub use state_machine::TransitionError;

/// Lifecycle state of a forward session.
///
/// Variants:
/// - `Connecting`: the subprocess is running but has not reported the listener yet.
/// - `Connected`: the tunnel is up.
/// - `Disconnected`: the subprocess exited on its own.
/// - `Error`: a failure was classified; teardown is in progress.
/// - `Stopped`: an explicit stop was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
    Stopped,
}
