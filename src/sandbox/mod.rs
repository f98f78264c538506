//! Ephemeral privileged pods that expose a node's root filesystem.
//!
//! A sandbox is a single-container pod pinned to one node with the node's `/`
//! mounted read-write at [`HOST_MOUNT_PATH`]. [`SandboxManager`] creates it,
//! waits for readiness and deletes it; [`SandboxGuard`] ties the delete to
//! scope so it happens exactly once on every exit path.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use node_files_mcp::cluster::KubeClient;
//! use node_files_mcp::config::ClusterCredentials;
//! use node_files_mcp::sandbox::{SandboxConfig, SandboxManager, SandboxSpec};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(KubeClient::new(&ClusterCredentials::anonymous("https://127.0.0.1:6443"))?);
//! let config = SandboxConfig::default();
//! let manager = SandboxManager::new(client, config.clone());
//!
//! let guard = manager.acquire(&SandboxSpec::new("worker-1", &config)).await?;
//! manager.wait_ready(guard.handle(), &CancellationToken::new()).await?;
//! // ... exec against guard.handle().exec_target() ...
//! guard.release().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod manager;
mod naming;

pub use config::{DEFAULT_IMAGE, DEFAULT_NAMESPACE, SandboxConfig};
pub use manager::{SandboxGuard, SandboxManager};
pub use naming::{FixedNames, NAME_PREFIX, NameGenerator, RandomNames};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::cluster::{
    Container, HostPathVolumeSource, ObjectMeta, Pod, PodSpec, SecurityContext, Volume,
    VolumeMount,
};
use crate::exec::ExecTarget;

/// Where the node's root filesystem appears inside the sandbox container.
pub const HOST_MOUNT_PATH: &str = "/host";

/// Name of the single sandbox container.
pub const CONTAINER_NAME: &str = "node-files";

const HOST_VOLUME_NAME: &str = "node-root";
const IDLE_COMMAND: &str = "sleep 3600";
const MANAGED_BY: &str = "node-files-mcp";

/// What to run and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    /// The node the pod is pinned to.
    pub node_name: String,
    pub namespace: String,
    pub image: String,
    pub privileged: bool,
}

impl SandboxSpec {
    /// A spec for `node_name` with namespace, image and privilege from `config`.
    #[must_use]
    pub fn new(node_name: impl Into<String>, config: &SandboxConfig) -> Self {
        Self {
            node_name: node_name.into(),
            namespace: config.namespace.clone(),
            image: config.image.clone(),
            privileged: config.privileged,
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    #[must_use]
    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Renders the pod manifest under the given name.
    ///
    /// Exactly one container, exactly one host-root volume, bound to
    /// `node_name` with restart policy `Never`.
    #[must_use]
    pub fn to_pod(&self, name: &str) -> Pod {
        let labels = BTreeMap::from([
            (String::from("app.kubernetes.io/name"), name.to_string()),
            (
                String::from("app.kubernetes.io/component"),
                String::from(CONTAINER_NAME),
            ),
            (
                String::from("app.kubernetes.io/managed-by"),
                String::from(MANAGED_BY),
            ),
        ]);

        Pod {
            api_version: String::from("v1"),
            kind: String::from("Pod"),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels,
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                node_name: Some(self.node_name.clone()),
                restart_policy: Some(String::from("Never")),
                containers: vec![Container {
                    name: String::from(CONTAINER_NAME),
                    image: self.image.clone(),
                    command: vec![
                        String::from("/bin/sh"),
                        String::from("-c"),
                        String::from(IDLE_COMMAND),
                    ],
                    security_context: Some(SecurityContext {
                        privileged: Some(self.privileged),
                    }),
                    volume_mounts: vec![VolumeMount {
                        name: String::from(HOST_VOLUME_NAME),
                        mount_path: String::from(HOST_MOUNT_PATH),
                        read_only: false,
                    }],
                }],
                volumes: vec![Volume {
                    name: String::from(HOST_VOLUME_NAME),
                    host_path: Some(HostPathVolumeSource {
                        path: String::from("/"),
                        kind: None,
                    }),
                }],
            }),
            status: None,
        }
    }
}

/// A created sandbox pod. Owned by the one operation that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub namespace: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl SandboxHandle {
    /// Where to run commands for this sandbox.
    #[must_use]
    pub fn exec_target(&self) -> ExecTarget {
        ExecTarget::new(&self.namespace, &self.name, CONTAINER_NAME)
    }

    /// Mount path of the node root inside the container.
    #[must_use]
    pub fn mount_path(&self) -> &'static str {
        HOST_MOUNT_PATH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SandboxSpec {
        SandboxSpec::new("worker-1", &SandboxConfig::default())
    }

    #[test]
    fn test_spec_defaults_from_config() {
        let spec = spec();
        assert_eq!(spec.namespace, "default");
        assert_eq!(spec.image, "busybox");
        assert!(spec.privileged);

        let spec = spec.with_namespace("ops").with_image("alpine").with_privileged(false);
        assert_eq!(spec.namespace, "ops");
        assert_eq!(spec.image, "alpine");
        assert!(!spec.privileged);
    }

    #[test]
    fn test_manifest_shape() {
        let pod = spec().to_pod("node-files-bcd23");
        let pod_spec = pod.spec.as_ref().unwrap();

        assert_eq!(pod.metadata.name.as_deref(), Some("node-files-bcd23"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(pod_spec.node_name.as_deref(), Some("worker-1"));
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));

        assert_eq!(pod_spec.containers.len(), 1);
        let container = &pod_spec.containers[0];
        assert_eq!(container.name, CONTAINER_NAME);
        assert_eq!(container.image, "busybox");
        assert_eq!(container.command, ["/bin/sh", "-c", "sleep 3600"]);
        assert_eq!(
            container.security_context.as_ref().unwrap().privileged,
            Some(true)
        );

        assert_eq!(pod_spec.volumes.len(), 1);
        assert_eq!(pod_spec.volumes[0].host_path.as_ref().unwrap().path, "/");
        assert_eq!(container.volume_mounts.len(), 1);
        assert_eq!(container.volume_mounts[0].name, pod_spec.volumes[0].name);
        assert_eq!(container.volume_mounts[0].mount_path, HOST_MOUNT_PATH);
        assert!(!container.volume_mounts[0].read_only);
    }

    #[test]
    fn test_manifest_serializes_as_pod() {
        let value = serde_json::to_value(spec().to_pod("node-files-bcd23")).unwrap();
        assert_eq!(value["apiVersion"], "v1");
        assert_eq!(value["kind"], "Pod");
        assert_eq!(value["spec"]["nodeName"], "worker-1");
        assert_eq!(value["spec"]["restartPolicy"], "Never");
        assert_eq!(value["spec"]["volumes"][0]["hostPath"]["path"], "/");
        assert_eq!(
            value["spec"]["containers"][0]["securityContext"]["privileged"],
            true
        );
        assert_eq!(
            value["metadata"]["labels"]["app.kubernetes.io/managed-by"],
            "node-files-mcp"
        );
        assert!(value.get("status").is_none());
    }

    #[test]
    fn test_handle_exec_target() {
        let handle = SandboxHandle {
            namespace: String::from("ops"),
            name: String::from("node-files-bcd23"),
            created_at: Utc::now(),
        };
        assert_eq!(
            handle.exec_target(),
            ExecTarget::new("ops", "node-files-bcd23", "node-files")
        );
        assert_eq!(handle.mount_path(), "/host");
    }
}
