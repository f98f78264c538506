//! List, get and put expressed as remote shell commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::request::{FileOperation, OperationRequest, file_name};
use super::shell;
use crate::config::DEFAULT_MAX_PAYLOAD_BYTES;
use crate::error::{NodeFilesError, StreamError};
use crate::exec::{ExecTarget, RemoteCommandResult, RemoteExecutor};

/// Runs file operations against one sandbox.
///
/// Node paths are resolved under `mount`; relative local paths under
/// `working_dir`.
pub struct FileTranslator {
    executor: Arc<dyn RemoteExecutor>,
    target: ExecTarget,
    mount: String,
    working_dir: PathBuf,
    max_payload_bytes: usize,
}

impl FileTranslator {
    #[must_use]
    pub fn new(executor: Arc<dyn RemoteExecutor>, target: ExecTarget, mount: impl Into<String>) -> Self {
        Self {
            executor,
            target,
            mount: mount.into(),
            working_dir: PathBuf::from("."),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    /// Sets the directory relative local paths are resolved against.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Sets the largest file `put` will carry inline.
    #[must_use]
    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    /// Dispatches a validated request.
    ///
    /// # Errors
    ///
    /// See [`list`](Self::list), [`get`](Self::get) and [`put`](Self::put).
    pub async fn perform(
        &self,
        request: &OperationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, NodeFilesError> {
        match request.operation {
            FileOperation::List => self.list(&request.source_path, cancel).await,
            FileOperation::Get => {
                self.get(&request.source_path, request.dest_path.as_deref(), cancel)
                    .await
            }
            FileOperation::Put => {
                let dest = request
                    .dest_path
                    .as_deref()
                    .ok_or_else(|| NodeFilesError::Validation(String::from("missing required argument: dest_path")))?;
                self.put(&request.source_path, dest, cancel).await
            }
        }
    }

    /// Long-format listing of a node directory, unmodified.
    ///
    /// # Errors
    ///
    /// Returns `NodeFilesError::Exec` if the listing command fails.
    #[instrument(skip(self, cancel))]
    pub async fn list(&self, path: &str, cancel: &CancellationToken) -> Result<String, NodeFilesError> {
        let output = self
            .run(shell::list_command(&self.mount, path), "failed to list directory", cancel)
            .await?;
        Ok(output.payload_text())
    }

    /// Copies a node file to the local filesystem.
    ///
    /// Without `dest`, the file lands in the working directory under the
    /// source's file name. The local file only appears once fully written.
    /// Like every command's output, stderr stands in for empty stdout.
    ///
    /// # Errors
    ///
    /// Returns `NodeFilesError::Exec` if the read fails, or
    /// `NodeFilesError::LocalIo` if the local directory or file cannot be
    /// written.
    #[instrument(skip(self, cancel))]
    pub async fn get(
        &self,
        source: &str,
        dest: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, NodeFilesError> {
        let dest = match dest {
            Some(dest) => self.local_path(dest),
            None => {
                let name = file_name(source).ok_or_else(|| {
                    NodeFilesError::Validation(format!(
                        "cannot derive a local file name from source_path: {source}"
                    ))
                })?;
                self.working_dir.join(name)
            }
        };

        let output = self
            .run(shell::read_command(&self.mount, source), "failed to read file from node", cancel)
            .await?;
        if output.stdout.is_empty() && !output.stderr.is_empty() {
            warn!(stderr = %output.stderr_text(), "Read produced only stderr; saving it as the content");
        }

        let content = output.payload();
        write_local(&dest, content).await?;
        debug!(bytes = content.len(), dest = %dest.display(), "Wrote local file");

        Ok(format!(
            "File successfully copied from node:{source} to {}",
            dest.display()
        ))
    }

    /// Copies a local text file to the node.
    ///
    /// Creates the node's destination directory first when it is not the
    /// root.
    ///
    /// # Errors
    ///
    /// - `NodeFilesError::LocalIo` if the source cannot be read
    /// - `NodeFilesError::UnsupportedPayload` if the content is not text-safe,
    ///   above `max_payload_bytes`, or too large for one exec argument once
    ///   quoted
    /// - `NodeFilesError::Exec` if a remote command fails
    #[instrument(skip(self, cancel))]
    pub async fn put(
        &self,
        source: &str,
        dest: &str,
        cancel: &CancellationToken,
    ) -> Result<String, NodeFilesError> {
        let local = self.local_path(source);
        let content = fs::read(&local).await.map_err(|e| {
            NodeFilesError::local_io(format!("failed to read source file {}", local.display()), e)
        })?;
        let text = inline_payload(&local, content, self.max_payload_bytes)?;

        let write = shell::write_command(&self.mount, dest, &text);
        if !shell::fits_exec_argument(&write) {
            let script_len = write.last().map_or(0, String::len);
            return Err(NodeFilesError::UnsupportedPayload {
                path: local,
                reason: format!(
                    "quoted command is {script_len} bytes, above the {} byte exec argument limit",
                    shell::MAX_ARG_STRLEN
                ),
            });
        }

        if let Some(dir) = shell::parent_dir(dest) {
            self.run(
                shell::mkdir_command(&self.mount, dir),
                "failed to create destination directory",
                cancel,
            )
            .await?;
        }

        self.run(write, "failed to write file to node", cancel)
            .await?;
        debug!(bytes = text.len(), "Wrote node file");

        Ok(format!(
            "File successfully copied from {source} to node:{dest}"
        ))
    }

    fn local_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    async fn run(
        &self,
        command: Vec<String>,
        stage: &'static str,
        cancel: &CancellationToken,
    ) -> Result<RemoteCommandResult, NodeFilesError> {
        self.executor
            .execute(&self.target, &command, cancel)
            .await
            .map_err(|source| match source.source {
                StreamError::Cancelled => NodeFilesError::Cancelled {
                    stage: "running a remote command",
                },
                _ => NodeFilesError::Exec { stage, source },
            })
    }
}

/// Checks that file content can travel inside a single-quoted shell word.
fn inline_payload(path: &Path, content: Vec<u8>, max: usize) -> Result<String, NodeFilesError> {
    let unsupported = |reason: String| NodeFilesError::UnsupportedPayload {
        path: path.to_path_buf(),
        reason,
    };

    if content.len() > max {
        return Err(unsupported(format!(
            "file is {} bytes, above the {max} byte inline limit",
            content.len()
        )));
    }
    if content.contains(&0) {
        return Err(unsupported(String::from("file contains NUL bytes")));
    }
    String::from_utf8(content).map_err(|_| unsupported(String::from("file is not valid UTF-8")))
}

/// Writes through a sibling temporary file and renames it into place.
async fn write_local(path: &Path, content: &[u8]) -> Result<(), NodeFilesError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(|e| {
            NodeFilesError::local_io(
                format!("failed to create local directory {}", parent.display()),
                e,
            )
        })?;
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{name}.part"));

    let written = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        fs::rename(&temp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&temp).await;
        return Err(NodeFilesError::local_io(
            format!("failed to write local file {}", path.display()),
            e,
        ));
    }
    Ok(())
}
