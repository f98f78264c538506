//! Access gate for cluster resource kinds.
//!
//! Every node file operation asks the gate about the resource kinds it is
//! about to touch before talking to the cluster. The built-in gate denies
//! kinds listed in the `denied_resources` section of the static config.

use std::fmt;

use serde::Deserialize;
use tracing::debug;

use crate::error::NodeFilesError;

/// Group, version and kind of a cluster resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct GroupVersionKind {
    /// API group; empty for the core group.
    #[serde(default)]
    pub group: String,
    /// API version, e.g. `v1`.
    pub version: String,
    /// Resource kind; empty in a denial entry means every kind in the group/version.
    #[serde(default)]
    pub kind: String,
}

impl GroupVersionKind {
    /// Creates a new group/version/kind triple.
    #[must_use]
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// The core `v1` Pod kind used by sandbox pods.
    #[must_use]
    pub fn pod() -> Self {
        Self::new("", "v1", "Pod")
    }

    /// Returns true if `self`, read as a denial entry, covers `other`.
    #[must_use]
    pub fn covers(&self, other: &GroupVersionKind) -> bool {
        self.group == other.group
            && self.version == other.version
            && (self.kind.is_empty() || self.kind == other.kind)
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
    }
}

/// Authorizes resource kinds before any cluster interaction.
pub trait AccessGate: Send + Sync {
    /// Returns `Ok` if the kind may be used, or `AccessDenied` naming it.
    ///
    /// # Errors
    ///
    /// Returns `NodeFilesError::AccessDenied` if the kind is rejected.
    fn check(&self, gvk: &GroupVersionKind) -> Result<(), NodeFilesError>;
}

/// Gate that rejects every kind matched by a deny list.
#[derive(Debug, Clone, Default)]
pub struct DeniedResources {
    denied: Vec<GroupVersionKind>,
}

impl DeniedResources {
    /// Creates a gate from a deny list.
    #[must_use]
    pub fn new(denied: Vec<GroupVersionKind>) -> Self {
        Self { denied }
    }

    /// A gate that allows everything.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }
}

impl AccessGate for DeniedResources {
    fn check(&self, gvk: &GroupVersionKind) -> Result<(), NodeFilesError> {
        if self.denied.iter().any(|entry| entry.covers(gvk)) {
            debug!(resource = %gvk, "Resource denied by access gate");
            return Err(NodeFilesError::AccessDenied {
                resource: gvk.to_string(),
            });
        }
        Ok(())
    }
}
