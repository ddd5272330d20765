pub mod types;

pub use types::{ConfigError, FailureKind, ForwardError, ProcessError, TunnelFailure, WebError};
