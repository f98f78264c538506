//! Static configuration and cluster credentials.
//!
//! The server reads an optional TOML file:
//!
//! ```toml
//! kubeconfig = "/etc/node-files/kubeconfig"
//! denied_resources = [{ version = "v1", kind = "Secret" }]
//!
//! [node_files]
//! namespace = "node-debug"
//! image = "busybox:1.36"
//! ready_timeout_secs = 60
//! ```
//!
//! Cluster credentials come from a kubeconfig file or, failing that, from the
//! in-cluster service account (see [`ClusterCredentials`]).

mod kubeconfig;

pub use kubeconfig::{ClusterAuth, ClusterCredentials, default_kubeconfig_path};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::access::GroupVersionKind;
use crate::error::ConfigError;
use crate::sandbox::SandboxConfig;

/// Default upper bound for the raw bytes of a Put payload.
///
/// The quoted command is checked separately against the exec argument limit.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 100 * 1024;

/// Settings for node file operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFilesConfig {
    /// Sandbox pod defaults and timing.
    pub sandbox: SandboxConfig,

    /// Largest local file Put will carry inline.
    pub max_payload_bytes: usize,
}

impl Default for NodeFilesConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl NodeFilesConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the sandbox settings.
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Sets the inline payload limit.
    #[must_use]
    pub fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }
}

/// `[node_files]` table of the static config; every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeFilesSection {
    pub namespace: Option<String>,
    pub image: Option<String>,
    pub privileged: Option<bool>,
    pub ready_timeout_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub teardown_timeout_secs: Option<u64>,
    pub max_payload_bytes: Option<usize>,
}

/// Contents of the TOML configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticConfig {
    /// Kubeconfig to use instead of the default lookup.
    pub kubeconfig: Option<PathBuf>,

    /// Resource kinds the access gate rejects.
    pub denied_resources: Vec<GroupVersionKind>,

    /// Node file operation overrides.
    pub node_files: NodeFilesSection,
}

impl StaticConfig {
    /// Loads the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file cannot be read, or
    /// `ConfigError::Toml` if it is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Toml {
            path: path.to_path_buf(),
            source: e,
        })?;

        debug!(
            path = %path.display(),
            denied = config.denied_resources.len(),
            "Loaded static configuration"
        );
        Ok(config)
    }

    /// Resolves the node file settings, applying overrides onto defaults.
    #[must_use]
    pub fn node_files_config(&self) -> NodeFilesConfig {
        let section = &self.node_files;
        let mut sandbox = SandboxConfig::default();

        if let Some(namespace) = &section.namespace {
            sandbox = sandbox.with_namespace(namespace.clone());
        }
        if let Some(image) = &section.image {
            sandbox = sandbox.with_image(image.clone());
        }
        if let Some(privileged) = section.privileged {
            sandbox = sandbox.with_privileged(privileged);
        }
        if let Some(secs) = section.ready_timeout_secs {
            sandbox = sandbox.with_ready_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = section.poll_interval_secs {
            sandbox = sandbox.with_poll_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = section.teardown_timeout_secs {
            sandbox = sandbox.with_teardown_timeout(Duration::from_secs(secs));
        }

        let mut config = NodeFilesConfig::new().with_sandbox(sandbox);
        if let Some(limit) = section.max_payload_bytes {
            config = config.with_max_payload_bytes(limit);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: StaticConfig = toml::from_str("").unwrap();
        assert!(config.kubeconfig.is_none());
        assert!(config.denied_resources.is_empty());
        assert_eq!(config.node_files_config(), NodeFilesConfig::default());
    }

    #[test]
    fn test_denied_resources_parse() {
        let config: StaticConfig = toml::from_str(
            r#"
            denied_resources = [
                { version = "v1", kind = "Pod" },
                { group = "rbac.authorization.k8s.io", version = "v1" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.denied_resources.len(), 2);
        assert_eq!(config.denied_resources[0], GroupVersionKind::pod());
        assert_eq!(config.denied_resources[1].group, "rbac.authorization.k8s.io");
        assert!(config.denied_resources[1].kind.is_empty());
    }

    #[test]
    fn test_node_files_overrides() {
        let config: StaticConfig = toml::from_str(
            r#"
            kubeconfig = "/tmp/kc"

            [node_files]
            namespace = "debug"
            image = "alpine"
            privileged = false
            ready_timeout_secs = 30
            poll_interval_secs = 1
            teardown_timeout_secs = 10
            max_payload_bytes = 4096
            "#,
        )
        .unwrap();

        let resolved = config.node_files_config();
        assert_eq!(config.kubeconfig, Some(PathBuf::from("/tmp/kc")));
        assert_eq!(resolved.sandbox.namespace, "debug");
        assert_eq!(resolved.sandbox.image, "alpine");
        assert!(!resolved.sandbox.privileged);
        assert_eq!(resolved.sandbox.ready_timeout, Duration::from_secs(30));
        assert_eq!(resolved.sandbox.poll_interval, Duration::from_secs(1));
        assert_eq!(resolved.sandbox.teardown_timeout, Duration::from_secs(10));
        assert_eq!(resolved.max_payload_bytes, 4096);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<StaticConfig, _> = toml::from_str("denied_resource = []");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "node_files = 3").unwrap();

        let err = StaticConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Toml { path: p, .. } if p == path));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            StaticConfig::load(&missing),
            Err(ConfigError::Read { .. })
        ));
    }
}
