pub mod configuration;
pub mod error_handling;
pub mod network;
pub mod output_classifier;
pub mod session_management;
pub mod tunnel_process;
pub mod web_interface;

pub use configuration::types::{ResourceKind, TunnelSpec};
pub use error_handling::types::{FailureKind, ForwardError};
pub use session_management::{
    Advisory, AdvisoryKind, ForwardEvent, ForwardManager, ForwardSettings, SessionState,
    SessionView,
};
