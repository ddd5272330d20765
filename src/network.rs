//! Local network helpers used by the forward supervisor.

pub mod port_probe;

pub use port_probe::{ensure_available, find_next_available, is_available, suggest_alternative};
