//! Shared test doubles for the cluster and the exec channel.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use node_files_mcp::cluster::{Pod, PodApi, PodCondition, PodPhase, PodStatus};
use node_files_mcp::error::{ClusterError, ExecFailure, StreamError};
use node_files_mcp::exec::{ExecTarget, RemoteCommandResult, RemoteExecutor};
use node_files_mcp::sandbox::{FixedNames, HOST_MOUNT_PATH};

pub const POD_NAME: &str = "node-files-test1";

pub fn fixed_names() -> std::sync::Arc<FixedNames> {
    std::sync::Arc::new(FixedNames::new([POD_NAME]))
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How the fake pod behaves while being polled.
#[derive(Debug, Clone, Copy)]
pub enum Readiness {
    /// Ready on the first poll.
    Ready,
    /// Ready after this many polls that report `Pending`.
    AfterPolls(usize),
    /// `Pending` forever.
    Never,
    /// `Failed` on the first poll.
    Failed,
    /// The status read itself fails.
    ReadError,
}

/// How the fake API answers deletes.
#[derive(Debug, Clone, Copy)]
pub enum DeleteBehavior {
    Ok,
    Error,
    Hang,
}

/// In-memory [`PodApi`] that records every call.
pub struct RecordingPods {
    readiness: Readiness,
    reject_create: bool,
    delete: DeleteBehavior,
    created: Mutex<Vec<Pod>>,
    deleted: Mutex<Vec<(String, String)>>,
    polls: AtomicUsize,
}

impl RecordingPods {
    pub fn new(readiness: Readiness) -> Self {
        Self {
            readiness,
            reject_create: false,
            delete: DeleteBehavior::Ok,
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn ready() -> Self {
        Self::new(Readiness::Ready)
    }

    pub fn rejecting_create(mut self) -> Self {
        self.reject_create = true;
        self
    }

    pub fn with_delete(mut self, delete: DeleteBehavior) -> Self {
        self.delete = delete;
        self
    }

    pub fn created(&self) -> Vec<Pod> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn pod(name: &str, phase: PodPhase, ready: bool) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.status = Some(PodStatus {
            phase,
            conditions: vec![PodCondition {
                kind: "Ready".into(),
                status: if ready { "True" } else { "False" }.into(),
            }],
            reason: (phase == PodPhase::Failed).then(|| "Evicted".into()),
            message: None,
        });
        pod
    }
}

#[async_trait]
impl PodApi for RecordingPods {
    async fn create_pod(&self, _namespace: &str, pod: &Pod) -> Result<Pod, ClusterError> {
        if self.reject_create {
            return Err(ClusterError::Api {
                status: 403,
                message: "pods is forbidden: exceeded quota".into(),
            });
        }
        self.created.lock().unwrap().push(pod.clone());
        Ok(pod.clone())
    }

    async fn get_pod(&self, _namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        match self.readiness {
            Readiness::Ready => Ok(Self::pod(name, PodPhase::Running, true)),
            Readiness::AfterPolls(n) if poll >= n => Ok(Self::pod(name, PodPhase::Running, true)),
            Readiness::AfterPolls(_) | Readiness::Never => {
                Ok(Self::pod(name, PodPhase::Pending, false))
            }
            Readiness::Failed => Ok(Self::pod(name, PodPhase::Failed, false)),
            Readiness::ReadError => Err(ClusterError::Api {
                status: 500,
                message: "etcdserver: request timed out".into(),
            }),
        }
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.deleted
            .lock()
            .unwrap()
            .push((namespace.to_string(), name.to_string()));
        match self.delete {
            DeleteBehavior::Ok => Ok(()),
            DeleteBehavior::Error => Err(ClusterError::Api {
                status: 500,
                message: "internal error".into(),
            }),
            DeleteBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

/// One scripted exec outcome.
#[derive(Debug, Clone)]
pub enum Reply {
    Output { stdout: String, stderr: String },
    Failure { stderr: String, message: String },
}

impl Reply {
    pub fn stdout(text: &str) -> Self {
        Self::Output {
            stdout: text.into(),
            stderr: String::new(),
        }
    }

    pub fn stderr(text: &str) -> Self {
        Self::Output {
            stdout: String::new(),
            stderr: text.into(),
        }
    }

    pub fn failure(stderr: &str, message: &str) -> Self {
        Self::Failure {
            stderr: stderr.into(),
            message: message.into(),
        }
    }
}

/// [`RemoteExecutor`] that replays scripted replies and records commands.
///
/// Once the script runs out every command succeeds with no output.
#[derive(Default)]
pub struct ScriptedExecutor {
    replies: Mutex<VecDeque<Reply>>,
    commands: Mutex<Vec<(ExecTarget, Vec<String>)>>,
}

impl ScriptedExecutor {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|(_, command)| command.clone())
            .collect()
    }

    pub fn targets(&self) -> Vec<ExecTarget> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|(target, _)| target.clone())
            .collect()
    }

    /// The `-c` script of each recorded command.
    pub fn scripts(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .map(|command| command.last().cloned().unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        target: &ExecTarget,
        command: &[String],
        cancel: &CancellationToken,
    ) -> Result<RemoteCommandResult, ExecFailure> {
        if cancel.is_cancelled() {
            return Err(ExecFailure::new("", StreamError::Cancelled));
        }
        self.commands
            .lock()
            .unwrap()
            .push((target.clone(), command.to_vec()));

        match self.replies.lock().unwrap().pop_front() {
            None => Ok(RemoteCommandResult::default()),
            Some(Reply::Output { stdout, stderr }) => Ok(RemoteCommandResult {
                stdout: stdout.into_bytes(),
                stderr: stderr.into_bytes(),
            }),
            Some(Reply::Failure { stderr, message }) => {
                Err(ExecFailure::new(stderr, StreamError::Remote(message)))
            }
        }
    }
}

/// [`RemoteExecutor`] that runs commands with the local shell.
///
/// Quoted paths under the sandbox mount are redirected into `root`, so a
/// temporary directory plays the node's filesystem.
pub struct LocalShellExecutor {
    root: PathBuf,
    commands: Mutex<Vec<Vec<String>>>,
}

impl LocalShellExecutor {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }

    fn rewrite(&self, arg: &str) -> String {
        arg.replace(
            &format!("'{HOST_MOUNT_PATH}"),
            &format!("'{}", self.root.display()),
        )
    }
}

#[async_trait]
impl RemoteExecutor for LocalShellExecutor {
    async fn execute(
        &self,
        _target: &ExecTarget,
        command: &[String],
        _cancel: &CancellationToken,
    ) -> Result<RemoteCommandResult, ExecFailure> {
        self.commands.lock().unwrap().push(command.to_vec());

        let (program, args) = command.split_first().expect("empty command");
        let output = tokio::process::Command::new(program)
            .args(args.iter().map(|arg| self.rewrite(arg)))
            .output()
            .await
            .expect("failed to spawn local shell");

        let result = RemoteCommandResult {
            stdout: output.stdout,
            stderr: output.stderr,
        };
        if output.status.success() {
            Ok(result)
        } else {
            Err(ExecFailure::new(
                result.stderr_text(),
                StreamError::Remote(format!(
                    "command terminated with non-zero exit code: {}",
                    output.status.code().unwrap_or(-1)
                )),
            ))
        }
    }
}
