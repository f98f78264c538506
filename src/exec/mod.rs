//! Remote command execution inside sandbox pods.
//!
//! A command runs over one upgraded connection to the pod's `exec`
//! sub-resource. Two transports exist:
//!
//! - [`WebSocketTransport`]: message framing over a WebSocket
//!   (`v5.channel.k8s.io`), tried first.
//! - [`SpdyTransport`]: stream multiplexing over SPDY/3.1
//!   (`v4.channel.k8s.io`), used when the WebSocket upgrade is refused.
//!
//! [`FallbackTransport`] chains them and [`should_fallback`] decides which
//! establishment failures move on to the second transport. [`StreamExecutor`]
//! adds cancellation and stderr handling on top of any transport.

mod spdy;
mod status;
mod websocket;

pub use spdy::SpdyTransport;
pub use status::StatusProtocol;
pub use websocket::WebSocketTransport;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cluster::KubeClient;
use crate::error::{ExecFailure, StreamError};

/// Container inside a pod that commands run in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl ExecTarget {
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }
}

/// Output captured from one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteCommandResult {
    /// Standard output bytes.
    pub stdout: Vec<u8>,
    /// Standard error bytes.
    pub stderr: Vec<u8>,
}

impl RemoteCommandResult {
    /// Standard error decoded lossily as UTF-8.
    #[must_use]
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// The informational payload of the command.
    ///
    /// Standard output, unless it is empty and standard error is not; tools
    /// that report status on stderr with a successful exit keep their message.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        if self.stdout.is_empty() && !self.stderr.is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }

    /// [`payload`](Self::payload) decoded lossily as UTF-8.
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(self.payload()).into_owned()
    }
}

/// One way of streaming a command's output from a pod.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Runs `command` and appends its output to `output` until the remote
    /// streams close.
    ///
    /// Output written before a failure stays in `output`.
    async fn stream(
        &self,
        target: &ExecTarget,
        command: &[String],
        output: &mut RemoteCommandResult,
    ) -> Result<(), StreamError>;
}

/// Returns true for establishment failures that the legacy transport may
/// still get through: a refused protocol upgrade or an HTTPS proxy rejecting
/// the upgrade.
#[must_use]
pub fn should_fallback(err: &StreamError) -> bool {
    matches!(
        err,
        StreamError::UpgradeFailed { .. } | StreamError::ProxyRejected(_)
    )
}

/// Tries `primary`, then `secondary` when the primary's failure qualifies.
pub struct FallbackTransport {
    primary: Box<dyn StreamTransport>,
    secondary: Box<dyn StreamTransport>,
    should_fallback: fn(&StreamError) -> bool,
}

impl FallbackTransport {
    /// Chains two transports using [`should_fallback`].
    #[must_use]
    pub fn new(primary: Box<dyn StreamTransport>, secondary: Box<dyn StreamTransport>) -> Self {
        Self::with_predicate(primary, secondary, should_fallback)
    }

    /// Chains two transports with a custom fallback predicate.
    #[must_use]
    pub fn with_predicate(
        primary: Box<dyn StreamTransport>,
        secondary: Box<dyn StreamTransport>,
        should_fallback: fn(&StreamError) -> bool,
    ) -> Self {
        Self {
            primary,
            secondary,
            should_fallback,
        }
    }

    /// WebSocket first, SPDY second, both against the same API server.
    #[must_use]
    pub fn websocket_then_spdy(client: Arc<KubeClient>) -> Self {
        Self::new(
            Box::new(WebSocketTransport::new(Arc::clone(&client))),
            Box::new(SpdyTransport::new(client)),
        )
    }
}

#[async_trait]
impl StreamTransport for FallbackTransport {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn stream(
        &self,
        target: &ExecTarget,
        command: &[String],
        output: &mut RemoteCommandResult,
    ) -> Result<(), StreamError> {
        match self.primary.stream(target, command, output).await {
            Err(err) if (self.should_fallback)(&err) => {
                warn!(
                    primary = self.primary.name(),
                    secondary = self.secondary.name(),
                    error = %err,
                    "Exec transport refused, falling back"
                );
                *output = RemoteCommandResult::default();
                self.secondary.stream(target, command, output).await
            }
            result => result,
        }
    }
}

/// Runs one command in a pod and returns its captured output.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Runs `command` to completion, or until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `ExecFailure` carrying any captured stderr if the stream could
    /// not be established, broke, was cancelled, or the command failed.
    async fn execute(
        &self,
        target: &ExecTarget,
        command: &[String],
        cancel: &CancellationToken,
    ) -> Result<RemoteCommandResult, ExecFailure>;
}

/// [`RemoteExecutor`] over a [`StreamTransport`]. One call, one stream; no retries.
pub struct StreamExecutor<T> {
    transport: T,
}

impl<T: StreamTransport> StreamExecutor<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

impl StreamExecutor<FallbackTransport> {
    /// The production executor for a cluster client.
    #[must_use]
    pub fn for_cluster(client: Arc<KubeClient>) -> Self {
        Self::new(FallbackTransport::websocket_then_spdy(client))
    }
}

#[async_trait]
impl<T: StreamTransport> RemoteExecutor for StreamExecutor<T> {
    #[instrument(skip(self, command, cancel), fields(pod = %target.pod, transport = self.transport.name()))]
    async fn execute(
        &self,
        target: &ExecTarget,
        command: &[String],
        cancel: &CancellationToken,
    ) -> Result<RemoteCommandResult, ExecFailure> {
        let mut output = RemoteCommandResult::default();

        let result = tokio::select! {
            result = self.transport.stream(target, command, &mut output) => result,
            () = cancel.cancelled() => Err(StreamError::Cancelled),
        };

        match result {
            Ok(()) => {
                debug!(
                    stdout_bytes = output.stdout.len(),
                    stderr_bytes = output.stderr.len(),
                    "Remote command completed"
                );
                Ok(output)
            }
            Err(err) => {
                debug!(error = %err, "Remote command failed");
                Err(ExecFailure::new(output.stderr_text(), err))
            }
        }
    }
}

/// Returns true if any error in the chain mentions a proxy or tunnel.
pub(crate) fn mentions_proxy(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        let text = e.to_string().to_ascii_lowercase();
        if text.contains("proxy") || text.contains("tunnel") {
            return true;
        }
        current = e.source();
    }
    false
}

/// Maps a failed upgrade request to the fallback taxonomy.
pub(crate) fn classify_request_error(err: reqwest::Error) -> StreamError {
    if mentions_proxy(&err) {
        StreamError::ProxyRejected(err.to_string())
    } else {
        StreamError::Connect(err)
    }
}

/// Builds the `UpgradeFailed` error for a non-101 response.
pub(crate) async fn upgrade_refused(response: reqwest::Response) -> StreamError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<crate::cluster::Status>(&body)
        .ok()
        .and_then(|s| s.message)
        .unwrap_or_else(|| body.trim().to_string());

    StreamError::UpgradeFailed {
        status: Some(status.as_u16()),
        reason: if detail.is_empty() {
            status.to_string()
        } else {
            format!("{status}: {detail}")
        },
    }
}
