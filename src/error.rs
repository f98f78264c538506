//! Error types for the node files server.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the application.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Configuration or credentials could not be loaded
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    /// MCP server error
    #[error("MCP server error")]
    #[diagnostic(code(node_files::server))]
    Server(#[from] ServerError),
}

/// Errors raised while loading static configuration and cluster credentials.
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    /// A configuration file could not be read
    #[error("Failed to read {}", path.display())]
    #[diagnostic(code(node_files::config::read))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML configuration file is malformed
    #[error("Failed to parse configuration file {}", path.display())]
    #[diagnostic(code(node_files::config::toml))]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The kubeconfig file is malformed
    #[error("Failed to parse kubeconfig {}", path.display())]
    #[diagnostic(code(node_files::config::kubeconfig))]
    Kubeconfig {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A named context, cluster or user is missing from the kubeconfig
    #[error("{kind} '{name}' not found in kubeconfig")]
    #[diagnostic(
        code(node_files::config::missing_entry),
        help("Check current-context and the clusters/users lists of the kubeconfig")
    )]
    MissingEntry { kind: &'static str, name: String },

    /// Neither a kubeconfig nor in-cluster credentials are available
    #[error("No cluster credentials found")]
    #[diagnostic(
        code(node_files::config::no_credentials),
        help("Pass --kubeconfig, set KUBECONFIG, or run inside a pod with a service account")
    )]
    NoCredentials,

    /// A credential entry is present but unusable
    #[error("Invalid credential in {context}: {reason}")]
    #[diagnostic(code(node_files::config::credential))]
    InvalidCredential { context: String, reason: String },

    /// The HTTP client could not be built from the credentials
    #[error("Failed to build cluster HTTP client")]
    #[diagnostic(code(node_files::config::client))]
    Client(#[source] reqwest::Error),
}

/// Errors returned by the cluster resource API.
#[derive(Error, Debug, Diagnostic)]
pub enum ClusterError {
    /// The API server answered with a non-success status
    #[error("{message} (HTTP {status})")]
    #[diagnostic(code(node_files::cluster::api))]
    Api { status: u16, message: String },

    /// The request never produced a response
    #[error("cluster API request failed: {0}")]
    #[diagnostic(code(node_files::cluster::transport))]
    Transport(#[source] reqwest::Error),

    /// The response body could not be decoded
    #[error("failed to decode {context}")]
    #[diagnostic(code(node_files::cluster::decode))]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// A request URL could not be built
    #[error("invalid cluster URL: {0}")]
    #[diagnostic(code(node_files::cluster::url))]
    InvalidUrl(String),
}

impl ClusterError {
    /// Returns true if the API server reported the object as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

/// Errors raised while establishing or consuming a remote exec stream.
#[derive(Error, Debug, Diagnostic)]
pub enum StreamError {
    /// The server did not switch protocols
    #[error("unable to upgrade connection: {reason}")]
    #[diagnostic(code(node_files::stream::upgrade))]
    UpgradeFailed { status: Option<u16>, reason: String },

    /// An intermediating HTTPS proxy refused the upgrade
    #[error("proxy rejected connection upgrade: {0}")]
    #[diagnostic(code(node_files::stream::proxy))]
    ProxyRejected(String),

    /// Connecting to the API server failed for another reason
    #[error("failed to connect for exec: {0}")]
    #[diagnostic(code(node_files::stream::connect))]
    Connect(#[source] reqwest::Error),

    /// The WebSocket layer failed mid-stream
    #[error("websocket stream error: {0}")]
    #[diagnostic(code(node_files::stream::websocket))]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer violated the framing protocol
    #[error("stream protocol error: {0}")]
    #[diagnostic(code(node_files::stream::protocol))]
    Protocol(String),

    /// The remote process reported a failure on the status channel
    #[error("{0}")]
    #[diagnostic(code(node_files::stream::remote))]
    Remote(String),

    /// Reading or writing the upgraded connection failed
    #[error("stream I/O error: {0}")]
    #[diagnostic(code(node_files::stream::io))]
    Io(#[from] std::io::Error),

    /// The caller cancelled the operation while the stream was open
    #[error("exec stream cancelled")]
    #[diagnostic(code(node_files::stream::cancelled))]
    Cancelled,
}

/// A failed remote command together with whatever it wrote to stderr.
#[derive(Debug)]
pub struct ExecFailure {
    /// Standard error captured before the failure.
    pub stderr: String,
    /// The transport or remote error.
    pub source: StreamError,
}

impl ExecFailure {
    /// Wraps a stream error with the stderr captured so far.
    #[must_use]
    pub fn new(stderr: impl Into<String>, source: StreamError) -> Self {
        Self {
            stderr: stderr.into(),
            source,
        }
    }
}

impl fmt::Display for ExecFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stderr.is_empty() {
            write!(f, "{}", self.source)
        } else {
            write!(f, "exec error: {}: {}", self.stderr, self.source)
        }
    }
}

impl std::error::Error for ExecFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Errors of a single node file operation.
///
/// Everything after validation names the stage that failed; only one of these
/// is ever returned per call.
#[derive(Error, Debug, Diagnostic)]
pub enum NodeFilesError {
    /// A required argument is missing or malformed
    #[error("{0}")]
    #[diagnostic(code(node_files::validation))]
    Validation(String),

    /// The access gate rejected a resource kind
    #[error("resource not allowed: {resource}")]
    #[diagnostic(
        code(node_files::access_denied),
        help("Remove the entry from denied_resources to allow this operation")
    )]
    AccessDenied { resource: String },

    /// The cluster refused to create the sandbox pod
    #[error("failed to create pod: {source}")]
    #[diagnostic(code(node_files::pod_creation))]
    PodCreation {
        #[source]
        source: ClusterError,
    },

    /// Reading the sandbox pod during the readiness wait failed
    #[error("pod {pod} failed to become ready: {source}")]
    #[diagnostic(code(node_files::pod_status))]
    PodStatus {
        pod: String,
        #[source]
        source: ClusterError,
    },

    /// The sandbox pod did not become ready in time
    #[error("pod {pod} failed to become ready: timeout waiting for pod to be ready after {}s", timeout.as_secs())]
    #[diagnostic(
        code(node_files::readiness_timeout),
        help("Check that the node is schedulable and the image can be pulled")
    )]
    ReadinessTimeout {
        pod: String,
        timeout: std::time::Duration,
    },

    /// The sandbox pod entered the Failed phase
    #[error("pod {pod} failed to become ready: pod failed{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    #[diagnostic(code(node_files::pod_failed))]
    PodFailed { pod: String, reason: Option<String> },

    /// A remote command failed
    #[error("{stage}: {source}")]
    #[diagnostic(code(node_files::exec))]
    Exec {
        stage: &'static str,
        #[source]
        source: ExecFailure,
    },

    /// A local file could not be read or written
    #[error("{context}: {source}")]
    #[diagnostic(code(node_files::local_io))]
    LocalIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The local file cannot be carried through a shell command
    #[error("cannot transfer {}: {reason}", path.display())]
    #[diagnostic(
        code(node_files::unsupported_payload),
        help("Only text files without NUL bytes and below the inline size limit can be put")
    )]
    UnsupportedPayload { path: PathBuf, reason: String },

    /// The caller cancelled the operation
    #[error("operation cancelled while {stage}")]
    #[diagnostic(code(node_files::cancelled))]
    Cancelled { stage: &'static str },
}

impl NodeFilesError {
    /// Builds a local I/O error with context.
    pub(crate) fn local_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::LocalIo {
            context: context.into(),
            source,
        }
    }
}

/// Errors related to the MCP server.
#[derive(Error, Debug, Diagnostic)]
pub enum ServerError {
    /// Failed to initialize server
    #[error("Failed to initialize MCP server: {0}")]
    #[diagnostic(code(node_files::server::init))]
    InitializationFailed(String),

    /// Transport error
    #[error("Transport error: {0}")]
    #[diagnostic(code(node_files::server::transport))]
    Transport(String),
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exec_failure_without_stderr_shows_source_only() {
        let failure = ExecFailure::new("", StreamError::Remote("boom".into()));
        assert_eq!(failure.to_string(), "boom");
    }

    #[test]
    fn test_exec_failure_joins_stderr_and_source() {
        let failure = ExecFailure::new(
            "cat: /host/nope: No such file or directory",
            StreamError::Remote("command terminated with non-zero exit code: 1".into()),
        );
        assert_eq!(
            failure.to_string(),
            "exec error: cat: /host/nope: No such file or directory: \
             command terminated with non-zero exit code: 1"
        );
    }

    #[test]
    fn test_readiness_timeout_mentions_timeout() {
        let err = NodeFilesError::ReadinessTimeout {
            pod: "node-files-abcde".into(),
            timeout: Duration::from_secs(120),
        };
        let message = err.to_string();
        assert!(message.contains("timeout"), "got: {message}");
        assert!(message.contains("node-files-abcde"));
    }

    #[test]
    fn test_pod_failed_reason_is_optional() {
        let bare = NodeFilesError::PodFailed {
            pod: "p".into(),
            reason: None,
        };
        assert_eq!(bare.to_string(), "pod p failed to become ready: pod failed");

        let with_reason = NodeFilesError::PodFailed {
            pod: "p".into(),
            reason: Some("ErrImagePull".into()),
        };
        assert_eq!(
            with_reason.to_string(),
            "pod p failed to become ready: pod failed: ErrImagePull"
        );
    }

    #[test]
    fn test_config_errors_keep_their_diagnostic() {
        let err = Error::from(ConfigError::NoCredentials);
        assert_eq!(err.to_string(), "No cluster credentials found");
        assert_eq!(
            err.code().map(|c| c.to_string()).as_deref(),
            Some("node_files::config::no_credentials")
        );
        assert!(err.help().is_some());
    }

    #[test]
    fn test_not_found_detection() {
        let err = ClusterError::Api {
            status: 404,
            message: "pods \"x\" not found".into(),
        };
        assert!(err.is_not_found());
        let err = ClusterError::Api {
            status: 500,
            message: "boom".into(),
        };
        assert!(!err.is_not_found());
    }
}
