//! Configuration for sandbox pods.

use std::time::Duration;

/// Namespace used when a request does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Image used when a request does not name one.
pub const DEFAULT_IMAGE: &str = "busybox";

/// Defaults and timing for sandbox pods.
///
/// Use the builder methods to customize the sandbox behavior.
///
/// # Example
///
/// ```
/// use node_files_mcp::sandbox::SandboxConfig;
/// use std::time::Duration;
///
/// let config = SandboxConfig::default()
///     .with_namespace("node-debug")
///     .with_image("alpine")
///     .with_ready_timeout(Duration::from_secs(60))
///     .with_poll_interval(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Namespace for sandbox pods when the request leaves it unset.
    pub namespace: String,

    /// Container image for sandbox pods when the request leaves it unset.
    pub image: String,

    /// Whether the sandbox container runs privileged by default.
    pub privileged: bool,

    /// Maximum time to wait for the pod to report ready.
    pub ready_timeout: Duration,

    /// Delay between readiness polls.
    pub poll_interval: Duration,

    /// Deadline for the delete call, independent of the caller's deadline.
    pub teardown_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            namespace: String::from(DEFAULT_NAMESPACE),
            image: String::from(DEFAULT_IMAGE),
            privileged: true,
            ready_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            teardown_timeout: Duration::from_secs(30),
        }
    }
}

impl SandboxConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the default container image.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Sets whether containers run privileged by default.
    #[must_use]
    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Sets the readiness deadline.
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Sets the readiness poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the teardown deadline.
    #[must_use]
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }
}
