//! Pattern table mapping forwarding tool output to outcomes.
//!
//! Every piece of tool wording the supervisor reacts to lives in [`RULES`].
//! Rules are tried top to bottom and the first match wins, so more specific
//! wording (e.g. "command not found") must precede broader wording
//! (e.g. "not found").

use regex::{Regex, RegexBuilder};
use std::fmt;
use std::sync::LazyLock;

use crate::error_handling::types::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// What a single output line means for its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// The tool reports the local listener is up.
    Established,
    Failure(FailureKind),
    Unmatched,
}

/// `(stream, case-insensitive pattern, outcome)`, in match order.
pub const RULES: &[(OutputStream, &str, LineOutcome)] = &[
    (
        OutputStream::Stdout,
        r"^\s*Forwarding from \S+:\d+ -> \d+",
        LineOutcome::Established,
    ),
    (
        OutputStream::Stderr,
        r"command not found|kubectl: not found|executable file not found|is not recognized as an internal or external command",
        LineOutcome::Failure(FailureKind::BinaryNotFound),
    ),
    (
        OutputStream::Stderr,
        r"unable to listen on|address already in use",
        LineOutcome::Failure(FailureKind::LocalPortTaken),
    ),
    (
        OutputStream::Stderr,
        r"forbidden|permission denied|unauthorized|cannot create resource|(pods|services)/portforward",
        LineOutcome::Failure(FailureKind::PermissionDenied),
    ),
    (
        OutputStream::Stderr,
        r"\(NotFound\)|not found|lost connection to pod",
        LineOutcome::Failure(FailureKind::ResourceGone),
    ),
    (
        OutputStream::Stderr,
        r"connection refused|unable to connect|no route to host|network is unreachable|connection reset by peer|i/o timeout",
        LineOutcome::Failure(FailureKind::ConnectionFailed),
    ),
    (
        OutputStream::Stderr,
        r"unable to forward|error forwarding|an error occurred forwarding|error upgrading connection",
        LineOutcome::Failure(FailureKind::ForwardFailed),
    ),
];

static COMPILED: LazyLock<Vec<(OutputStream, Regex, LineOutcome)>> = LazyLock::new(|| {
    RULES
        .iter()
        .map(|(stream, pattern, outcome)| {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("output rule patterns are static and valid");
            (*stream, regex, *outcome)
        })
        .collect()
});

/// Classifies one line read from `stream`.
pub fn classify(stream: OutputStream, line: &str) -> LineOutcome {
    COMPILED
        .iter()
        .filter(|(rule_stream, _, _)| *rule_stream == stream)
        .find(|(_, regex, _)| regex.is_match(line))
        .map(|(_, _, outcome)| *outcome)
        .unwrap_or(LineOutcome::Unmatched)
}
