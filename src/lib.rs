//! Node files MCP server - file operations on Kubernetes nodes.
//!
//! Kubernetes nodes expose no filesystem API. This crate reaches a node's root
//! filesystem by scheduling a short-lived privileged pod onto it with `/`
//! mounted at `/host`, running shell commands in that pod over the `exec`
//! sub-resource, and deleting the pod afterwards.
//!
//! # Layers
//!
//! - [`access`]: denied-resources gate consulted before any cluster call
//! - [`cluster`]: pod model and the HTTPS API client
//! - [`exec`]: WebSocket and SPDY exec transports with fallback
//! - [`sandbox`]: pod manifest, readiness polling and guaranteed teardown
//! - [`files`]: list/get/put as shell commands, and the [`NodeFiles`] entry point
//! - [`server`]: the `node_files` MCP tool over stdio
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use node_files_mcp::access::DeniedResources;
//! use node_files_mcp::cluster::KubeClient;
//! use node_files_mcp::config::{ClusterCredentials, NodeFilesConfig};
//! use node_files_mcp::files::{NodeFiles, NodeFilesArgs};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let credentials = ClusterCredentials::discover(None, None)?;
//!     let client = Arc::new(KubeClient::new(&credentials)?);
//!     let files = NodeFiles::for_cluster(
//!         client,
//!         Arc::new(DeniedResources::allow_all()),
//!         NodeFilesConfig::default(),
//!     );
//!
//!     let listing = files
//!         .run(
//!             NodeFilesArgs {
//!                 node_name: Some("worker-1".into()),
//!                 operation: Some("list".into()),
//!                 source_path: Some("/var/log".into()),
//!                 ..NodeFilesArgs::default()
//!             },
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!     println!("{listing}");
//!     Ok(())
//! }
//! ```

pub mod access;
pub mod cluster;
pub mod config;
pub mod error;
pub mod exec;
pub mod files;
pub mod sandbox;
pub mod server;

// Re-export commonly used types
pub use error::{Error, NodeFilesError, Result};
pub use files::{FileOperation, NodeFiles, NodeFilesArgs, OperationRequest};
pub use sandbox::{SandboxConfig, SandboxHandle, SandboxManager, SandboxSpec};
