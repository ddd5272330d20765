//! Output classifier.
//!
//! Turns the forwarding tool's stdout/stderr into [`LineOutcome`]s: the
//! "Forwarding from" marker means the tunnel is up, recognised stderr wording
//! maps to a [`FailureKind`](crate::error_handling::types::FailureKind), and
//! everything else is kept only for diagnostics.
//!
//! The tool's output is unversioned free text, so matching is best-effort and
//! all wording is kept in the single table in [`rules`].

pub mod line_pump;
pub mod rules;

pub use line_pump::{spawn_line_pump, OutputLine};
pub use rules::{classify, LineOutcome, OutputStream};
