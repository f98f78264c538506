//! MCP server implementation.
//!
//! This module provides the stdio MCP server exposing the `node_files` tool.

mod handler;

pub use handler::{NodeFilesServer, run};
