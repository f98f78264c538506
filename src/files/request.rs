//! Tool arguments and their validated form.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::NodeFilesError;
use crate::sandbox::{SandboxConfig, SandboxSpec};

/// What to do with the node filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    /// Copy a local file to the node.
    Put,
    /// Copy a node file to the local filesystem.
    Get,
    /// List a node directory.
    List,
}

impl FileOperation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Get => "get",
            Self::List => "list",
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileOperation {
    type Err = NodeFilesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "put" => Ok(Self::Put),
            "get" => Ok(Self::Get),
            "list" => Ok(Self::List),
            other => Err(NodeFilesError::Validation(format!(
                "unknown operation: {other}"
            ))),
        }
    }
}

/// Raw arguments of the `node_files` tool.
///
/// Everything is optional at this level so that missing and malformed values
/// are reported by [`OperationRequest::from_args`] with a stable message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeFilesArgs {
    /// Name of the node to access
    pub node_name: Option<String>,

    /// Operation to perform: 'put' (copy from local to node), 'get' (copy from
    /// node to local), or 'list' (list files in a directory)
    pub operation: Option<String>,

    /// Source path for the operation. For 'put': local file path. For 'get':
    /// node file path. For 'list': node directory path
    pub source_path: Option<String>,

    /// Destination path for the operation. For 'put': node file path. For
    /// 'get': local file path (optional, defaults to the file name in the
    /// current directory). Not used for 'list'.
    pub dest_path: Option<String>,

    /// Namespace to create the temporary pod in (optional, defaults to 'default')
    pub namespace: Option<String>,

    /// Container image to use for the privileged pod (optional, defaults to 'busybox')
    pub image: Option<String>,

    /// Whether to run the container as privileged. Required for accessing node
    /// files. Set to false only if your use case doesn't require privileged
    /// access (default: true)
    pub privileged: Option<bool>,
}

/// A validated, immutable request for one node file operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    pub node_name: String,
    pub operation: FileOperation,
    pub source_path: String,
    /// Always set for `Put`; `None` for `Get` means "file name of the source
    /// in the working directory".
    pub dest_path: Option<String>,
    pub namespace: String,
    pub image: String,
    pub privileged: bool,
}

impl OperationRequest {
    /// Validates tool arguments, filling unset values from `defaults`.
    ///
    /// # Errors
    ///
    /// Returns `NodeFilesError::Validation` naming the first missing or
    /// unusable argument.
    pub fn from_args(args: NodeFilesArgs, defaults: &SandboxConfig) -> Result<Self, NodeFilesError> {
        let node_name = required(args.node_name, "node_name")?;
        let operation: FileOperation = required(args.operation, "operation")?.parse()?;
        let source_path = required(args.source_path, "source_path")?;
        let dest_path = args.dest_path.filter(|p| !p.is_empty());

        match operation {
            FileOperation::Put if dest_path.is_none() => {
                return Err(missing("dest_path"));
            }
            FileOperation::Get if dest_path.is_none() && file_name(&source_path).is_none() => {
                return Err(NodeFilesError::Validation(format!(
                    "cannot derive a local file name from source_path: {source_path}"
                )));
            }
            _ => {}
        }

        Ok(Self {
            node_name,
            operation,
            source_path,
            dest_path,
            namespace: non_empty(args.namespace).unwrap_or_else(|| defaults.namespace.clone()),
            image: non_empty(args.image).unwrap_or_else(|| defaults.image.clone()),
            privileged: args.privileged.unwrap_or(defaults.privileged),
        })
    }

    /// The sandbox this request needs.
    #[must_use]
    pub fn sandbox_spec(&self) -> SandboxSpec {
        SandboxSpec {
            node_name: self.node_name.clone(),
            namespace: self.namespace.clone(),
            image: self.image.clone(),
            privileged: self.privileged,
        }
    }
}

/// Final path component of a node path, if it has one.
pub(crate) fn file_name(path: &str) -> Option<&str> {
    Path::new(path).file_name().and_then(|name| name.to_str())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn missing(name: &str) -> NodeFilesError {
    NodeFilesError::Validation(format!("missing required argument: {name}"))
}

fn required(value: Option<String>, name: &str) -> Result<String, NodeFilesError> {
    non_empty(value).ok_or_else(|| missing(name))
}
