use crate::configuration::types::{ResourceKind, TunnelSpec};

/// Program and argument list for one forwarding subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl TunnelInvocation {
    /// Shell-like rendering for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Renders the `port-forward` command line for `spec`.
///
/// The output depends only on its inputs so identical specs always produce
/// identical invocations.
pub fn build_invocation(spec: &TunnelSpec, program: &str) -> TunnelInvocation {
    let mut args = vec![
        "port-forward".to_string(),
        format!(
            "{}/{}",
            spec.resource_kind.as_ref_prefix(),
            spec.resource_name
        ),
        format!("{}:{}", spec.local_port, spec.remote_port),
        "--namespace".to_string(),
        spec.namespace.clone(),
        "--context".to_string(),
        spec.cluster_context.clone(),
    ];

    if spec.resource_kind == ResourceKind::Pod {
        if let Some(container) = &spec.container_name {
            args.push("--container".to_string());
            args.push(container.clone());
        }
    }

    TunnelInvocation {
        program: program.to_string(),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: ResourceKind, container: Option<&str>) -> TunnelSpec {
        TunnelSpec {
            resource_kind: kind,
            resource_name: "web-1".to_string(),
            namespace: "default".to_string(),
            cluster_context: "ctx-a".to_string(),
            local_port: 8080,
            remote_port: 80,
            container_name: container.map(str::to_string),
        }
    }

    #[test]
    fn pod_invocation_layout() {
        let invocation = build_invocation(&spec(ResourceKind::Pod, None), "kubectl");
        assert_eq!(invocation.program, "kubectl");
        assert_eq!(
            invocation.args,
            vec![
                "port-forward",
                "pod/web-1",
                "8080:80",
                "--namespace",
                "default",
                "--context",
                "ctx-a"
            ]
        );
    }

    #[test]
    fn service_uses_service_reference() {
        let invocation = build_invocation(&spec(ResourceKind::Service, None), "kubectl");
        assert_eq!(invocation.args[1], "service/web-1");
    }

    #[test]
    fn container_selector_only_for_pods() {
        let pod = build_invocation(&spec(ResourceKind::Pod, Some("app")), "kubectl");
        assert_eq!(&pod.args[pod.args.len() - 2..], &["--container", "app"]);

        // Validation rejects this combination, the builder still never emits it.
        let service = build_invocation(&spec(ResourceKind::Service, Some("app")), "kubectl");
        assert!(!service.args.iter().any(|a| a == "--container"));
    }

    #[test]
    fn identical_specs_render_identically() {
        let a = build_invocation(&spec(ResourceKind::Pod, Some("app")), "/usr/local/bin/kubectl");
        let b = build_invocation(&spec(ResourceKind::Pod, Some("app")), "/usr/local/bin/kubectl");
        assert_eq!(a, b);
        assert_eq!(
            a.command_line(),
            "/usr/local/bin/kubectl port-forward pod/web-1 8080:80 --namespace default --context ctx-a --container app"
        );
    }
}
