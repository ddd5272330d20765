pub mod config;
pub mod types;

pub use config::{Config, Settings, WebUiConfig};
pub use types::{ForwardKey, ForwardTarget, ResourceKind, TunnelSpec};
