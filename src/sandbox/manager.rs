//! Sandbox pod lifecycle: create, wait for readiness, delete.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::naming::{NameGenerator, RandomNames};
use super::{SandboxConfig, SandboxHandle, SandboxSpec};
use crate::cluster::{PodApi, PodPhase};
use crate::error::NodeFilesError;

/// Creates and deletes sandbox pods through a [`PodApi`].
///
/// Holds no per-operation state; every call to [`create`](Self::create)
/// yields a fresh, uniquely named pod.
#[derive(Clone)]
pub struct SandboxManager {
    pods: Arc<dyn PodApi>,
    names: Arc<dyn NameGenerator>,
    config: SandboxConfig,
}

impl SandboxManager {
    /// Creates a manager that names pods with [`RandomNames`].
    #[must_use]
    pub fn new(pods: Arc<dyn PodApi>, config: SandboxConfig) -> Self {
        Self {
            pods,
            names: Arc::new(RandomNames),
            config,
        }
    }

    /// Replaces the pod name generator.
    #[must_use]
    pub fn with_names(mut self, names: Arc<dyn NameGenerator>) -> Self {
        self.names = names;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Submits the sandbox pod. Does not wait for scheduling.
    ///
    /// # Errors
    ///
    /// Returns `NodeFilesError::PodCreation` if the API server rejects the pod.
    #[instrument(skip(self, spec), fields(node = %spec.node_name, namespace = %spec.namespace))]
    pub async fn create(&self, spec: &SandboxSpec) -> Result<SandboxHandle, NodeFilesError> {
        let name = self.names.generate();
        let pod = spec.to_pod(&name);

        let created = self
            .pods
            .create_pod(&spec.namespace, &pod)
            .await
            .map_err(|source| NodeFilesError::PodCreation { source })?;

        let handle = SandboxHandle {
            namespace: created
                .metadata
                .namespace
                .unwrap_or_else(|| spec.namespace.clone()),
            name: created.metadata.name.unwrap_or(name),
            created_at: created.metadata.creation_timestamp.unwrap_or_else(Utc::now),
        };
        debug!(pod = %handle.name, "Created sandbox pod");
        Ok(handle)
    }

    /// Creates the sandbox pod and returns a guard that deletes it.
    ///
    /// # Errors
    ///
    /// Returns `NodeFilesError::PodCreation` if the API server rejects the pod.
    /// No guard exists in that case and nothing needs deleting.
    pub async fn acquire(&self, spec: &SandboxSpec) -> Result<SandboxGuard, NodeFilesError> {
        let handle = self.create(spec).await?;
        Ok(SandboxGuard {
            handle,
            pods: Arc::clone(&self.pods),
            teardown_timeout: self.config.teardown_timeout,
            armed: true,
        })
    }

    /// Polls the pod until it is running and ready.
    ///
    /// # Errors
    ///
    /// - `NodeFilesError::PodStatus` on the first failed read, without retrying
    /// - `NodeFilesError::PodFailed` if the pod enters the `Failed` phase
    /// - `NodeFilesError::ReadinessTimeout` once `ready_timeout` has elapsed
    /// - `NodeFilesError::Cancelled` as soon as `cancel` fires
    #[instrument(skip(self, handle, cancel), fields(pod = %handle.name))]
    pub async fn wait_ready(
        &self,
        handle: &SandboxHandle,
        cancel: &CancellationToken,
    ) -> Result<(), NodeFilesError> {
        let timeout = self.config.ready_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            if Instant::now() >= deadline {
                return Err(NodeFilesError::ReadinessTimeout {
                    pod: handle.name.clone(),
                    timeout,
                });
            }

            let pod = tokio::select! {
                result = self.pods.get_pod(&handle.namespace, &handle.name) => {
                    result.map_err(|source| NodeFilesError::PodStatus {
                        pod: handle.name.clone(),
                        source,
                    })?
                }
                () = cancel.cancelled() => {
                    return Err(NodeFilesError::Cancelled { stage: "waiting for pod readiness" });
                }
            };

            if pod.is_ready() {
                debug!("Sandbox pod is ready");
                return Ok(());
            }
            if pod.phase() == PodPhase::Failed {
                return Err(NodeFilesError::PodFailed {
                    pod: handle.name.clone(),
                    reason: pod.failure_reason(),
                });
            }
            trace!(phase = ?pod.phase(), "Sandbox pod not ready yet");

            let pause = self
                .config
                .poll_interval
                .min(deadline.saturating_duration_since(Instant::now()));
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                () = cancel.cancelled() => {
                    return Err(NodeFilesError::Cancelled { stage: "waiting for pod readiness" });
                }
            }
        }
    }

    /// Deletes the pod, bounded by `teardown_timeout`. Failures are logged.
    pub async fn teardown(&self, handle: &SandboxHandle) {
        teardown(self.pods.as_ref(), handle, self.config.teardown_timeout).await;
    }
}

/// Best-effort delete with its own deadline. Never fails.
#[instrument(skip(pods, handle), fields(pod = %handle.name, namespace = %handle.namespace))]
async fn teardown(pods: &dyn PodApi, handle: &SandboxHandle, timeout: Duration) {
    match tokio::time::timeout(timeout, pods.delete_pod(&handle.namespace, &handle.name)).await {
        Ok(Ok(())) => debug!("Deleted sandbox pod"),
        Ok(Err(e)) => warn!(error = %e, "Failed to delete sandbox pod"),
        Err(_) => warn!(timeout_secs = timeout.as_secs(), "Timed out deleting sandbox pod"),
    }
}

/// Owns a created sandbox and deletes it exactly once.
///
/// Call [`release`](Self::release) on every normal path. If the guard is
/// dropped while still armed (the owning future was cancelled, or a panic
/// unwound past it), the delete is spawned onto the current Tokio runtime.
pub struct SandboxGuard {
    handle: SandboxHandle,
    pods: Arc<dyn PodApi>,
    teardown_timeout: Duration,
    armed: bool,
}

impl SandboxGuard {
    #[must_use]
    pub fn handle(&self) -> &SandboxHandle {
        &self.handle
    }

    /// Deletes the sandbox, then disarms the guard.
    ///
    /// If this future is dropped before the delete finishes, the guard is
    /// still armed and `Drop` issues the delete again in the background.
    pub async fn release(mut self) {
        teardown(self.pods.as_ref(), &self.handle, self.teardown_timeout).await;
        self.armed = false;
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(pod = %self.handle.name, "No runtime to delete sandbox pod; it will be orphaned");
            return;
        };

        let pods = Arc::clone(&self.pods);
        let handle = self.handle.clone();
        let timeout = self.teardown_timeout;
        debug!(pod = %handle.name, "Sandbox guard dropped, deleting in background");
        runtime.spawn(async move {
            teardown(pods.as_ref(), &handle, timeout).await;
        });
    }
}

impl std::fmt::Debug for SandboxGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxGuard")
            .field("handle", &self.handle)
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}
