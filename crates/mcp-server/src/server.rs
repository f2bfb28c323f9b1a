//! MCP server runner with stdio transport

use std::path::PathBuf;

use rmcp::ServiceExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use codeloom_core::Config;

use crate::tool_handler::CodeloomToolServer;

/// Configuration for the MCP server
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Project root the pipeline operates against
    pub project_root: PathBuf,
    /// Pipeline configuration (cache/executor/detector/enrichment surface)
    pub config: Config,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        let project_root = std::env::current_dir().unwrap_or_default();
        Self {
            config: Config { project_root: project_root.clone(), ..Config::default() },
            project_root,
        }
    }
}

impl McpServerConfig {
    /// Override the project root (also threaded into `config.project_root`)
    pub fn with_project_root(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.config.project_root = path.clone();
        self.project_root = path;
        self
    }

    /// Replace the pipeline configuration wholesale
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }
}

/// Get stdin/stdout for stdio transport
fn stdio() -> (tokio::io::Stdin, tokio::io::Stdout) {
    (tokio::io::stdin(), tokio::io::stdout())
}

/// Run the MCP server with stdio transport
///
/// This function blocks until the client disconnects.
pub async fn run_mcp_server(config: McpServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing (logs to stderr so they don't interfere with MCP protocol on stdout)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok(); // Ignore error if already initialized

    info!(
        "Starting codeloom MCP server (project_root={})",
        config.project_root.display()
    );

    // Create the server handler
    let server = CodeloomToolServer::new(config.project_root.clone(), config.config.clone());

    // Serve with stdio transport
    let running = server.serve(stdio()).await?;

    info!("MCP server running, waiting for client requests...");

    // Wait for the client to disconnect
    running.waiting().await?;

    info!("MCP server shutting down");

    // Allow background tasks to drain
    tokio::task::yield_now().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = McpServerConfig::default();
        assert_eq!(config.config.cache.size, 1000);
    }

    #[test]
    fn test_config_builder() {
        let config = McpServerConfig::default().with_project_root("/tmp");

        assert_eq!(config.project_root, PathBuf::from("/tmp"));
        assert_eq!(config.config.project_root, PathBuf::from("/tmp"));
    }
}
