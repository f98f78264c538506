//! Node files MCP server - Entry Point
//!
//! This is the main entry point for the MCP server binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use miette::Result;
use tracing::{Level, debug, info};
use tracing_subscriber::{EnvFilter, fmt};

use node_files_mcp::access::DeniedResources;
use node_files_mcp::cluster::KubeClient;
use node_files_mcp::config::{ClusterCredentials, StaticConfig};
use node_files_mcp::files::NodeFiles;
use node_files_mcp::server;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Node files MCP server - list, get and put files on Kubernetes nodes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Kubeconfig to use (overrides the config file, $KUBECONFIG and ~/.kube/config)
    #[arg(long, value_name = "FILE")]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of current-context
    #[arg(long, value_name = "NAME")]
    context: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // MCP requires that logs go to stderr (stdout is for JSON-RPC)
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match args.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    info!("Node files MCP server v{}", env!("CARGO_PKG_VERSION"));

    let files = build_service(&args)?;
    server::run(files).await?;
    Ok(())
}

/// Loads configuration and credentials and wires the node files service.
fn build_service(args: &Args) -> node_files_mcp::Result<Arc<NodeFiles>> {
    let static_config = match &args.config {
        Some(path) => StaticConfig::load(path)?,
        None => StaticConfig::default(),
    };

    let kubeconfig = args.kubeconfig.as_deref().or(static_config.kubeconfig.as_deref());
    let credentials = ClusterCredentials::discover(kubeconfig, args.context.as_deref())?;
    info!(server = %credentials.server, "Using cluster");

    let client = Arc::new(KubeClient::new(&credentials)?);
    let gate = Arc::new(DeniedResources::new(static_config.denied_resources.clone()));
    let config = static_config.node_files_config();
    debug!(?config, "Node file settings");

    Ok(Arc::new(NodeFiles::for_cluster(client, gate, config)))
}
