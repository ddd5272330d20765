//! Tunnel process controller.
//!
//! Builds the forwarding tool's command line for a [`TunnelSpec`], launches it
//! with captured output, and stops it with a SIGTERM grace window followed by a
//! forced kill.
//!
//! Re-exports:
//! - [`build_invocation`], [`TunnelInvocation`]: command line rendering.
//! - [`TunnelProcess`]: the owned subprocess handle.
//!
//! [`TunnelSpec`]: crate::configuration::types::TunnelSpec

pub mod invocation;
pub mod process;

pub use invocation::{build_invocation, TunnelInvocation};
pub use process::TunnelProcess;
