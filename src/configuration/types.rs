use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error_handling::types::ForwardError;

/// Lowest local port a tunnel may listen on; everything below is privileged.
pub const MIN_LOCAL_PORT: u16 = 1024;

/// Kind of cluster resource a tunnel targets.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Pod,
    Service,
}

impl ResourceKind {
    /// Prefix used by the forwarding tool in `<kind>/<name>` references.
    pub fn as_ref_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pod",
            ResourceKind::Service => "service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Pod => write!(f, "Pod"),
            ResourceKind::Service => write!(f, "Service"),
        }
    }
}

/// Caller supplied description of one tunnel.
///
/// The same structure is read from `[[forwards]]` entries of the configuration
/// file and from the JSON body of `POST /forwards`.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct TunnelSpec {
    pub resource_kind: ResourceKind,
    pub resource_name: String,
    pub namespace: String,
    pub cluster_context: String,
    pub local_port: u16,
    pub remote_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

impl TunnelSpec {
    /// Checks identifiers, port ranges and the container selector.
    ///
    /// Returns [`ForwardError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ForwardError> {
        let identifiers = [
            ("resource_name", &self.resource_name),
            ("namespace", &self.namespace),
            ("cluster_context", &self.cluster_context),
        ];
        for (field, value) in identifiers {
            if value.trim().is_empty() {
                return Err(ForwardError::InvalidConfig(format!(
                    "{} must not be empty",
                    field
                )));
            }
        }

        if self.local_port < MIN_LOCAL_PORT {
            return Err(ForwardError::InvalidConfig(format!(
                "local_port {} is outside {}-65535",
                self.local_port, MIN_LOCAL_PORT
            )));
        }

        if self.remote_port == 0 {
            return Err(ForwardError::InvalidConfig(
                "remote_port 0 is outside 1-65535".to_string(),
            ));
        }

        if let Some(container) = &self.container_name {
            if self.resource_kind != ResourceKind::Pod {
                return Err(ForwardError::InvalidConfig(format!(
                    "container_name is only valid for pods, not {}",
                    self.resource_kind
                )));
            }
            if container.trim().is_empty() {
                return Err(ForwardError::InvalidConfig(
                    "container_name must not be empty when set".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Tuple used for duplicate resolution.
    pub fn key(&self) -> ForwardKey {
        ForwardKey {
            resource_kind: self.resource_kind,
            resource_name: self.resource_name.clone(),
            namespace: self.namespace.clone(),
            cluster_context: self.cluster_context.clone(),
            local_port: self.local_port,
        }
    }

    pub fn target(&self) -> ForwardTarget {
        ForwardTarget {
            resource_kind: self.resource_kind,
            resource_name: self.resource_name.clone(),
            namespace: self.namespace.clone(),
            cluster_context: self.cluster_context.clone(),
            local_port: self.local_port,
            remote_port: self.remote_port,
        }
    }
}

/// At most one live session exists per distinct key.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct ForwardKey {
    pub resource_kind: ResourceKind,
    pub resource_name: String,
    pub namespace: String,
    pub cluster_context: String,
    pub local_port: u16,
}

/// Identifying context attached to failures and advisories, enough for a
/// presentation layer to suggest a remedy.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct ForwardTarget {
    pub resource_kind: ResourceKind,
    pub resource_name: String,
    pub namespace: String,
    pub cluster_context: String,
    pub local_port: u16,
    pub remote_port: u16,
}

impl fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} (context {}) {}:{}",
            self.resource_kind,
            self.namespace,
            self.resource_name,
            self.cluster_context,
            self.local_port,
            self.remote_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_spec() -> TunnelSpec {
        TunnelSpec {
            resource_kind: ResourceKind::Pod,
            resource_name: "web-1".to_string(),
            namespace: "default".to_string(),
            cluster_context: "ctx-a".to_string(),
            local_port: 8080,
            remote_port: 80,
            container_name: None,
        }
    }

    fn invalid_reason(spec: &TunnelSpec) -> String {
        match spec.validate() {
            Err(ForwardError::InvalidConfig(reason)) => reason,
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn valid_pod_and_service_specs_pass() {
        assert!(pod_spec().validate().is_ok());

        let mut service = pod_spec();
        service.resource_kind = ResourceKind::Service;
        assert!(service.validate().is_ok());

        let mut with_container = pod_spec();
        with_container.container_name = Some("app".to_string());
        assert!(with_container.validate().is_ok());
    }

    #[test]
    fn empty_identifiers_are_rejected() {
        let mut spec = pod_spec();
        spec.resource_name = "  ".to_string();
        assert!(invalid_reason(&spec).contains("resource_name"));

        let mut spec = pod_spec();
        spec.namespace = String::new();
        assert!(invalid_reason(&spec).contains("namespace"));

        let mut spec = pod_spec();
        spec.cluster_context = String::new();
        assert!(invalid_reason(&spec).contains("cluster_context"));
    }

    #[test]
    fn port_ranges_are_enforced() {
        let mut spec = pod_spec();
        spec.local_port = 1023;
        assert!(invalid_reason(&spec).contains("local_port"));

        spec.local_port = MIN_LOCAL_PORT;
        assert!(spec.validate().is_ok());

        spec.local_port = u16::MAX;
        assert!(spec.validate().is_ok());

        spec.remote_port = 0;
        assert!(invalid_reason(&spec).contains("remote_port"));
    }

    #[test]
    fn container_only_allowed_on_pods() {
        let mut spec = pod_spec();
        spec.resource_kind = ResourceKind::Service;
        spec.container_name = Some("app".to_string());
        assert!(invalid_reason(&spec).contains("only valid for pods"));

        let mut spec = pod_spec();
        spec.container_name = Some(String::new());
        assert!(invalid_reason(&spec).contains("container_name"));
    }

    #[test]
    fn key_ignores_remote_port_and_container() {
        let a = pod_spec();
        let mut b = pod_spec();
        b.remote_port = 443;
        b.container_name = Some("sidecar".to_string());
        assert_eq!(a.key(), b.key());

        let mut c = pod_spec();
        c.local_port = 8081;
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn spec_deserializes_from_toml_table() {
        let spec: TunnelSpec = toml::from_str(
            r#"
            resource_kind = "service"
            resource_name = "api"
            namespace = "prod"
            cluster_context = "ctx-b"
            local_port = 9000
            remote_port = 8080
            "#,
        )
        .unwrap();
        assert_eq!(spec.resource_kind, ResourceKind::Service);
        assert_eq!(spec.container_name, None);
        assert_eq!(spec.target().to_string(), "Service prod/api (context ctx-b) 9000:8080");
    }
}
