use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::configuration::types::ForwardTarget;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidForward { index: usize, reason: String },
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidForward { index, reason } => {
                write!(f, "Forward #{} is invalid: {}", index, reason)
            }
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlError(err.to_string())
    }
}

/// Runtime failure classes recognised in the forwarding tool's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    BinaryNotFound,
    PermissionDenied,
    ResourceGone,
    ConnectionFailed,
    LocalPortTaken,
    ForwardFailed,
}

impl FailureKind {
    /// Short remedy hint a presentation layer can show next to the error.
    pub fn remedy(&self) -> &'static str {
        match self {
            FailureKind::BinaryNotFound => "install kubectl or point kubectl_path at it",
            FailureKind::PermissionDenied => {
                "check RBAC: the user needs create on pods/portforward in the namespace"
            }
            FailureKind::ResourceGone => "the target no longer exists, pick another resource",
            FailureKind::ConnectionFailed => "check that the remote port is listening, then retry",
            FailureKind::LocalPortTaken => "pick another local port",
            FailureKind::ForwardFailed => "retry the forward",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::BinaryNotFound => "binary not found",
            FailureKind::PermissionDenied => "permission denied",
            FailureKind::ResourceGone => "resource gone",
            FailureKind::ConnectionFailed => "connection failed",
            FailureKind::LocalPortTaken => "local port taken",
            FailureKind::ForwardFailed => "forward failed",
        };
        write!(f, "{}", name)
    }
}

/// A classified failure of a registered tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelFailure {
    pub kind: FailureKind,
    pub target: ForwardTarget,
    /// The tool's own wording, kept verbatim.
    pub message: String,
}

impl fmt::Display for TunnelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {}: {}", self.kind, self.target, self.message)
    }
}

#[derive(Debug)]
pub enum ForwardError {
    InvalidConfig(String),
    PortInUse { port: u16, suggestion: Option<u16> },
    NoPortAvailable { start: u16 },
    InvalidRange(u16),
    SpawnFailed {
        program: String,
        reason: String,
        binary_missing: bool,
    },
    ConnectionTimeout {
        target: ForwardTarget,
        after: Duration,
    },
    Tunnel(TunnelFailure),
    NotFound(Uuid),
    ManagerClosed,
}

impl ForwardError {
    /// Failure kind for classified tunnel errors, `None` for everything else.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ForwardError::Tunnel(failure) => Some(failure.kind),
            _ => None,
        }
    }
}

impl fmt::Display for ForwardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardError::InvalidConfig(e) => write!(f, "Invalid forward configuration: {}", e),
            ForwardError::PortInUse { port, suggestion } => match suggestion {
                Some(alt) => write!(f, "Local port {} is in use (try {})", port, alt),
                None => write!(f, "Local port {} is in use", port),
            },
            ForwardError::NoPortAvailable { start } => {
                write!(f, "No local port available in {}-65535", start)
            }
            ForwardError::InvalidRange(port) => {
                write!(f, "Start port {} is outside 1024-65535", port)
            }
            ForwardError::SpawnFailed {
                program,
                reason,
                binary_missing,
            } => {
                if *binary_missing {
                    write!(f, "Forwarding tool '{}' not found: {}", program, reason)
                } else {
                    write!(f, "Failed to launch '{}': {}", program, reason)
                }
            }
            ForwardError::ConnectionTimeout { target, after } => write!(
                f,
                "Forward for {} not established within {}s",
                target,
                after.as_secs()
            ),
            ForwardError::Tunnel(failure) => write!(f, "Tunnel error: {}", failure),
            ForwardError::NotFound(id) => write!(f, "Forward {} not found", id),
            ForwardError::ManagerClosed => write!(f, "Forward manager is shut down"),
        }
    }
}

impl std::error::Error for ForwardError {}

#[derive(Debug)]
pub enum ProcessError {
    SignalFailed(nix::errno::Errno),
    WaitFailed(std::io::Error),
    KillFailed(std::io::Error),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::SignalFailed(e) => write!(f, "Failed to signal process: {}", e),
            ProcessError::WaitFailed(e) => write!(f, "Failed to wait for process: {}", e),
            ProcessError::KillFailed(e) => write!(f, "Failed to kill process: {}", e),
        }
    }
}

impl std::error::Error for ProcessError {}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::ResourceKind;

    fn target() -> ForwardTarget {
        ForwardTarget {
            resource_kind: ResourceKind::Pod,
            resource_name: "web-1".to_string(),
            namespace: "default".to_string(),
            cluster_context: "ctx-a".to_string(),
            local_port: 8080,
            remote_port: 80,
        }
    }

    #[test]
    fn port_in_use_mentions_suggestion() {
        let err = ForwardError::PortInUse {
            port: 8080,
            suggestion: Some(8081),
        };
        assert!(err.to_string().contains("8081"));

        let err = ForwardError::PortInUse {
            port: 65535,
            suggestion: None,
        };
        assert_eq!(err.to_string(), "Local port 65535 is in use");
    }

    #[test]
    fn tunnel_failure_carries_full_context() {
        let err = ForwardError::Tunnel(TunnelFailure {
            kind: FailureKind::PermissionDenied,
            target: target(),
            message: "pods \"web-1\" is forbidden".to_string(),
        });
        let text = err.to_string();
        assert!(text.contains("permission denied"));
        assert!(text.contains("default/web-1"));
        assert!(text.contains("ctx-a"));
        assert!(text.contains("8080:80"));
        assert_eq!(err.failure_kind(), Some(FailureKind::PermissionDenied));
    }

    #[test]
    fn spawn_failure_distinguishes_missing_binary() {
        let missing = ForwardError::SpawnFailed {
            program: "kubectl".to_string(),
            reason: "No such file or directory".to_string(),
            binary_missing: true,
        };
        assert!(missing.to_string().starts_with("Forwarding tool 'kubectl' not found"));

        let other = ForwardError::SpawnFailed {
            program: "kubectl".to_string(),
            reason: "Permission denied".to_string(),
            binary_missing: false,
        };
        assert!(other.to_string().starts_with("Failed to launch"));
        assert_eq!(other.failure_kind(), None);
    }

    #[test]
    fn timeout_reports_seconds() {
        let err = ForwardError::ConnectionTimeout {
            target: target(),
            after: Duration::from_secs(10),
        };
        assert!(err.to_string().contains("within 10s"));
    }
}
