//! Loopback HTTP status API.
//!
//! A thin presentation layer over [`ForwardManager`](crate::session_management::ForwardManager):
//! it lists forwards, starts and stops them, and answers port availability
//! questions. Nothing here touches the registry directly.

pub mod routes;
pub mod web_server;

use serde::Serialize;

use crate::error_handling::types::{FailureKind, ForwardError};

pub use routes::{api_routes, error_status, PortStatus};
pub use web_server::WebServer;

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remedy: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<u16>,
}

impl ApiError {
    pub fn message(message: &str) -> Self {
        Self {
            message: message.to_string(),
            kind: None,
            remedy: None,
            suggestion: None,
        }
    }
}

impl From<&ForwardError> for ApiError {
    fn from(err: &ForwardError) -> Self {
        let kind = match err {
            ForwardError::SpawnFailed {
                binary_missing: true,
                ..
            } => Some(FailureKind::BinaryNotFound),
            other => other.failure_kind(),
        };
        let suggestion = match err {
            ForwardError::PortInUse { suggestion, .. } => *suggestion,
            _ => None,
        };
        Self {
            message: err.to_string(),
            kind,
            remedy: kind.map(|k| k.remedy()),
            suggestion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_carries_install_remedy() {
        let err = ForwardError::SpawnFailed {
            program: "kubectl".to_string(),
            reason: "No such file or directory".to_string(),
            binary_missing: true,
        };
        let payload = ApiError::from(&err);
        assert_eq!(payload.kind, Some(FailureKind::BinaryNotFound));
        assert_eq!(payload.remedy, Some(FailureKind::BinaryNotFound.remedy()));
    }

    #[test]
    fn port_conflict_carries_suggestion() {
        let payload = ApiError::from(&ForwardError::PortInUse {
            port: 8080,
            suggestion: Some(8081),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["suggestion"], 8081);
        assert!(json.get("kind").is_none());
    }
}
