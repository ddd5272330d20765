use log::debug;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::types::TunnelSpec;
use crate::error_handling::types::ConfigError;
use crate::session_management::ForwardSettings;

/// Application configuration loaded from a TOML file.
///
/// Every section is optional; an empty file yields the defaults and starts no
/// forwards.
///
/// # Examples
///
/// ```
/// use portwarden::configuration::config::Config;
///
/// let config = Config::from_toml_str(r#"
///     [settings]
///     connect_timeout_secs = 5
///
///     [[forwards]]
///     resource_kind = "service"
///     resource_name = "api"
///     namespace = "default"
///     cluster_context = "kind-dev"
///     local_port = 8080
///     remote_port = 80
/// "#).unwrap();
/// assert_eq!(config.forwards.len(), 1);
/// ```
///
/// # Fields Overview
///
/// - `settings`: how forwards are launched and stopped
/// - `web_ui`: the optional loopback status API
/// - `forwards`: tunnels started when the binary boots
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub web_ui: WebUiConfig,
    #[serde(default)]
    pub forwards: Vec<TunnelSpec>,
}

/// `[settings]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Forwarding tool, looked up on `PATH` unless absolute.
    pub kubectl_path: String,
    /// Time a start waits for the tool to report the listener.
    pub connect_timeout_secs: u64,
    /// SIGTERM grace window before the process is killed.
    pub termination_grace_ms: u64,
    /// Backlog per event subscriber.
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kubectl_path: "kubectl".to_string(),
            connect_timeout_secs: 10,
            termination_grace_ms: 1000,
            event_buffer: 64,
        }
    }
}

/// `[web_ui]` section. The API only ever binds loopback.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebUiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for WebUiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 7878,
        }
    }
}

impl Config {
    /// Reads, parses and validates the file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {:?}", path);
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies the same rules `start_forward` does to every configured forward,
    /// plus range checks on the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.kubectl_path.trim().is_empty() {
            return Err(ConfigError::NotInRange(
                "settings.kubectl_path must not be empty".to_string(),
            ));
        }
        if self.settings.connect_timeout_secs == 0 {
            return Err(ConfigError::NotInRange(
                "settings.connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.web_ui.enabled && self.web_ui.port == 0 {
            return Err(ConfigError::NotInRange(
                "web_ui.port must be in 1-65535".to_string(),
            ));
        }

        for (index, spec) in self.forwards.iter().enumerate() {
            spec.validate()
                .map_err(|e| ConfigError::InvalidForward {
                    index,
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    pub fn forward_settings(&self) -> ForwardSettings {
        ForwardSettings {
            kubectl_path: self.settings.kubectl_path.clone(),
            connect_timeout: Duration::from_secs(self.settings.connect_timeout_secs),
            termination_grace: Duration::from_millis(self.settings.termination_grace_ms),
            event_buffer: self.settings.event_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::ResourceKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL: &str = r#"
[settings]
kubectl_path = "/usr/local/bin/kubectl"
connect_timeout_secs = 5
termination_grace_ms = 250
event_buffer = 16

[web_ui]
enabled = true
port = 9999

[[forwards]]
resource_kind = "pod"
resource_name = "web-1"
namespace = "default"
cluster_context = "kind-dev"
local_port = 8080
remote_port = 80
container_name = "app"

[[forwards]]
resource_kind = "service"
resource_name = "postgres"
namespace = "db"
cluster_context = "prod"
local_port = 15432
remote_port = 5432
"#;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.settings, Settings::default());
        assert_eq!(config.web_ui, WebUiConfig::default());
        assert!(config.forwards.is_empty());
        assert_eq!(config.forward_settings(), ForwardSettings::default());
    }

    #[test]
    fn full_file_is_parsed() {
        let config = Config::from_toml_str(FULL).unwrap();
        assert_eq!(config.settings.kubectl_path, "/usr/local/bin/kubectl");
        assert!(config.web_ui.enabled);
        assert_eq!(config.web_ui.port, 9999);
        assert_eq!(config.forwards.len(), 2);
        assert_eq!(config.forwards[0].container_name.as_deref(), Some("app"));
        assert_eq!(config.forwards[1].resource_kind, ResourceKind::Service);

        let settings = config.forward_settings();
        assert_eq!(settings.connect_timeout, Duration::from_secs(5));
        assert_eq!(settings.termination_grace, Duration::from_millis(250));
        assert_eq!(settings.event_buffer, 16);
    }

    #[test]
    fn invalid_forward_reports_its_index() {
        let raw = FULL.replace("local_port = 15432", "local_port = 80");
        match Config::from_toml_str(&raw) {
            Err(ConfigError::InvalidForward { index, reason }) => {
                assert_eq!(index, 1);
                assert!(reason.contains("local_port"));
            }
            other => panic!("expected InvalidForward, got {:?}", other),
        }
    }

    #[test]
    fn container_on_service_is_rejected() {
        let raw = r#"
[[forwards]]
resource_kind = "service"
resource_name = "api"
namespace = "default"
cluster_context = "kind-dev"
local_port = 8080
remote_port = 80
container_name = "app"
"#;
        assert!(matches!(
            Config::from_toml_str(raw),
            Err(ConfigError::InvalidForward { index: 0, .. })
        ));
    }

    #[test]
    fn bad_toml_and_unknown_keys_fail() {
        assert!(matches!(
            Config::from_toml_str("[settings\n"),
            Err(ConfigError::TomlError(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[settings]\nretries = 3\n"),
            Err(ConfigError::TomlError(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[[forwards]]\nresource_kind = \"deployment\"\n"),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    fn zero_timeout_is_out_of_range() {
        assert!(matches!(
            Config::from_toml_str("[settings]\nconnect_timeout_secs = 0\n"),
            Err(ConfigError::NotInRange(_))
        ));
    }

    #[test]
    fn from_file_reads_disk() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.forwards.len(), 2);

        let missing = Config::from_file(Path::new("/nonexistent/portwarden.toml"));
        assert!(matches!(missing, Err(ConfigError::IoError(_))));
    }
}
