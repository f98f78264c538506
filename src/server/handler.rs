//! MCP server handler implementation.

use std::sync::Arc;

use rmcp::{
    ErrorData, RoleServer, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    service::RequestContext,
    tool, tool_handler, tool_router,
    transport::stdio,
};
use tracing::{debug, info, warn};

use crate::error::{NodeFilesError, ServerError};
use crate::files::{NodeFiles, NodeFilesArgs, OperationRequest};

/// Prefix of every failure reported after argument validation.
const OPERATION_FAILED: &str = "failed to perform node file operation";

/// The MCP server exposing node file operations.
#[derive(Clone)]
pub struct NodeFilesServer {
    files: Arc<NodeFiles>,
    tool_router: ToolRouter<Self>,
}

impl NodeFilesServer {
    /// Create a new server around a configured [`NodeFiles`] service.
    #[must_use]
    pub fn new(files: Arc<NodeFiles>) -> Self {
        Self {
            files,
            tool_router: Self::tool_router(),
        }
    }

    /// Runs one `node_files` call and renders the outcome as tool output.
    ///
    /// Validation failures are reported verbatim; anything later is prefixed
    /// with [`OPERATION_FAILED`].
    pub async fn call_node_files(
        &self,
        args: NodeFilesArgs,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> CallToolResult {
        let request = match OperationRequest::from_args(args, &self.files.config().sandbox) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "Rejected node_files arguments");
                return CallToolResult::error(vec![Content::text(e.to_string())]);
            }
        };

        match self.files.perform(&request, cancel).await {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(e) => {
                warn!(error = %e, operation = %request.operation, node = %request.node_name, "Node file operation failed");
                CallToolResult::error(vec![Content::text(render_failure(&e))])
            }
        }
    }
}

fn render_failure(err: &NodeFilesError) -> String {
    format!("{OPERATION_FAILED}: {err}")
}

#[tool_router]
impl NodeFilesServer {
    #[tool(
        name = "node_files",
        description = "Perform file operations (put, get, list) on a Kubernetes node filesystem by creating a privileged pod. WARNING: Requires privileged access to the node. This tool creates a temporary privileged pod that mounts the node's root filesystem to perform file operations. The pod is automatically deleted after the operation completes.",
        annotations(
            title = "Node: Files",
            read_only_hint = false,
            destructive_hint = true,
            idempotent_hint = false,
            open_world_hint = true
        )
    )]
    async fn node_files(
        &self,
        Parameters(args): Parameters<NodeFilesArgs>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.call_node_files(args, &context.ct).await)
    }
}

#[tool_handler]
impl rmcp::ServerHandler for NodeFilesServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Node file operations for Kubernetes. Each call schedules a short-lived \
                 privileged pod on the target node, mounts the node's root filesystem at /host, \
                 runs one list, get or put, and deletes the pod."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}

/// Run the MCP server.
///
/// This function starts the server with stdio transport and waits for it to complete.
///
/// # Errors
///
/// Returns error if server initialization or transport fails.
pub async fn run(files: Arc<NodeFiles>) -> crate::error::Result<()> {
    info!("Starting node files MCP server");
    debug!("Using stdio transport");

    let server = NodeFilesServer::new(files);

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| ServerError::InitializationFailed(e.to_string()))?;

    info!("Server initialized, waiting for requests");

    service
        .waiting()
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))?;

    info!("Server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_prefix() {
        let err = NodeFilesError::AccessDenied {
            resource: String::from("/v1, Kind=Pod"),
        };
        assert_eq!(
            render_failure(&err),
            "failed to perform node file operation: resource not allowed: /v1, Kind=Pod"
        );
    }
}
