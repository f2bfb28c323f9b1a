//! codeloom MCP server
//!
//! Exposes the duplication-detection/ranking/enrichment/application pipeline
//! as an MCP tool catalog over stdio.
//!
//! ## Usage
//!
//! Run as an MCP server (stdio transport):
//! ```bash
//! codeloom mcp-server
//! ```
//!
//! The server exposes `structural_search`, `find_duplicates`,
//! `rank_candidates`, `enrich_candidates`, `generate_extraction`,
//! `apply_deduplication`, and `rollback`.

mod server;
mod tool_handler;

pub use server::{run_mcp_server, McpServerConfig};
pub use tool_handler::CodeloomToolServer;
