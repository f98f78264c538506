//! File operations on a node's root filesystem.
//!
//! [`NodeFiles`] is the single entry point: it validates the arguments,
//! consults the access gate, and then runs one sandbox through
//! `SandboxCreating → SandboxWaitingReady → Executing → TearingDown`.
//! The delete always happens once a pod exists, whatever failed after it.
//!
//! Content crosses into the sandbox as a shell argument (see [`shell`]), which
//! limits `put` to moderate-size text files.

mod request;
pub mod shell;
mod translator;

pub use request::{FileOperation, NodeFilesArgs, OperationRequest};
pub use translator::FileTranslator;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::access::{AccessGate, GroupVersionKind};
use crate::cluster::{KubeClient, PodApi};
use crate::config::NodeFilesConfig;
use crate::error::NodeFilesError;
use crate::exec::{RemoteExecutor, StreamExecutor};
use crate::sandbox::{NameGenerator, SandboxGuard, SandboxManager};

/// Where a single operation is. Strictly increasing; never re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OperationPhase {
    Pending,
    SandboxCreating,
    SandboxWaitingReady,
    Executing,
    TearingDown,
    Succeeded,
    Failed,
}

impl OperationPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Tracks and logs the phase of one call.
#[derive(Debug)]
struct PhaseTracker<'a> {
    namespace: &'a str,
    pod: Option<String>,
    phase: OperationPhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(namespace: &'a str) -> Self {
        Self {
            namespace,
            pod: None,
            phase: OperationPhase::Pending,
        }
    }

    fn advance(&mut self, next: OperationPhase) {
        debug_assert!(
            next > self.phase && !self.phase.is_terminal(),
            "phase {:?} cannot follow {:?}",
            next,
            self.phase
        );
        debug!(
            namespace = self.namespace,
            pod = self.pod.as_deref().unwrap_or_default(),
            from = ?self.phase,
            phase = ?next,
            "Operation phase"
        );
        self.phase = next;
    }
}

/// Performs node file operations through ephemeral sandbox pods.
pub struct NodeFiles {
    sandboxes: SandboxManager,
    executor: Arc<dyn RemoteExecutor>,
    gate: Arc<dyn AccessGate>,
    config: NodeFilesConfig,
    working_dir: Option<PathBuf>,
}

impl NodeFiles {
    /// Assembles the service from its collaborators.
    #[must_use]
    pub fn new(
        pods: Arc<dyn PodApi>,
        executor: Arc<dyn RemoteExecutor>,
        gate: Arc<dyn AccessGate>,
        config: NodeFilesConfig,
    ) -> Self {
        Self {
            sandboxes: SandboxManager::new(pods, config.sandbox.clone()),
            executor,
            gate,
            config,
            working_dir: None,
        }
    }

    /// The production wiring: pods and exec both go to `client`.
    #[must_use]
    pub fn for_cluster(
        client: Arc<KubeClient>,
        gate: Arc<dyn AccessGate>,
        config: NodeFilesConfig,
    ) -> Self {
        let executor = Arc::new(StreamExecutor::for_cluster(Arc::clone(&client)));
        Self::new(client, executor, gate, config)
    }

    /// Replaces the sandbox pod name generator.
    #[must_use]
    pub fn with_names(mut self, names: Arc<dyn NameGenerator>) -> Self {
        self.sandboxes = self.sandboxes.with_names(names);
        self
    }

    /// Fixes the local working directory instead of reading it per call.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn config(&self) -> &NodeFilesConfig {
        &self.config
    }

    /// Validates raw tool arguments and performs the operation.
    ///
    /// # Errors
    ///
    /// Returns `NodeFilesError::Validation` before touching the cluster if the
    /// arguments are unusable, otherwise whatever [`perform`](Self::perform)
    /// returns.
    pub async fn run(
        &self,
        args: NodeFilesArgs,
        cancel: &CancellationToken,
    ) -> Result<String, NodeFilesError> {
        let request = OperationRequest::from_args(args, &self.config.sandbox)?;
        self.perform(&request, cancel).await
    }

    /// Performs a validated operation in a fresh sandbox.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the call: access denial, pod creation,
    /// readiness, the remote command, or local I/O. Teardown failures are
    /// logged, never returned.
    #[instrument(
        skip(self, request, cancel),
        fields(node = %request.node_name, operation = %request.operation)
    )]
    pub async fn perform(
        &self,
        request: &OperationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, NodeFilesError> {
        self.gate.check(&GroupVersionKind::pod())?;

        let working_dir = match &self.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|e| {
                NodeFilesError::local_io("failed to determine the working directory", e)
            })?,
        };

        let mut phase = PhaseTracker::new(&request.namespace);
        phase.advance(OperationPhase::SandboxCreating);

        let guard = match self.sandboxes.acquire(&request.sandbox_spec()).await {
            Ok(guard) => guard,
            Err(e) => {
                phase.advance(OperationPhase::Failed);
                return Err(e);
            }
        };
        phase.pod = Some(guard.handle().name.clone());

        let outcome = self
            .drive(&guard, request, working_dir, &mut phase, cancel)
            .await;

        phase.advance(OperationPhase::TearingDown);
        guard.release().await;

        phase.advance(if outcome.is_ok() {
            OperationPhase::Succeeded
        } else {
            OperationPhase::Failed
        });
        outcome
    }

    async fn drive(
        &self,
        guard: &SandboxGuard,
        request: &OperationRequest,
        working_dir: PathBuf,
        phase: &mut PhaseTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, NodeFilesError> {
        let handle = guard.handle();

        phase.advance(OperationPhase::SandboxWaitingReady);
        self.sandboxes.wait_ready(handle, cancel).await?;

        phase.advance(OperationPhase::Executing);
        FileTranslator::new(
            Arc::clone(&self.executor),
            handle.exec_target(),
            handle.mount_path(),
        )
        .with_working_dir(working_dir)
        .with_max_payload_bytes(self.config.max_payload_bytes)
        .perform(request, cancel)
        .await
    }
}
