//! codeloom CLI
//!
//! CLI entry point for the codeloom duplication-detection pipeline.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use codeloom_cli::{
    load_config, run_apply_command, run_doctor_command, run_find_duplicates_command,
    run_rank_command, run_rollback_command, Args, Command,
};
use codeloom_core::cache::QueryCache;
use codeloom_mcp_server::McpServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing to stderr before doing anything else.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let args = Args::parse();
    let config = load_config(&args);

    // One cache per process (§5/§9), constructed at startup alongside config
    // loading rather than freshly per subcommand invocation.
    let cache = QueryCache::new(config.cache.size, Duration::from_secs(config.cache.ttl_seconds));

    let exit_code = match &args.command {
        Command::McpServer => {
            let server_config = McpServerConfig::default()
                .with_project_root(config.project_root.clone())
                .with_config(config);
            match codeloom_mcp_server::run_mcp_server(server_config).await {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("Error: {e}");
                    1
                }
            }
        }
        Command::FindDuplicates(cmd_args) => run_find_duplicates_command(cmd_args, &config).await,
        Command::Rank(cmd_args) => run_rank_command(cmd_args, &config, &cache).await,
        Command::Apply(cmd_args) => run_apply_command(cmd_args, &config).await,
        Command::Rollback(cmd_args) => run_rollback_command(cmd_args, &config).await,
        Command::Doctor => run_doctor_command(&config),
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
