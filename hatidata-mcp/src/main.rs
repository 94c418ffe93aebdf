//! hatidata-mcp-server - MCP server for the HatiData agent-state engine
//!
//! Speaks newline-delimited JSON-RPC 2.0 over stdio. By default it
//! connects to a remote HatiData endpoint over the Postgres wire
//! protocol; with `--local` it runs the embedded engine against a single
//! database file instead. Both modes expose the same tool catalog.
//!
//! Log output goes to stderr; stdout carries protocol frames only.

use anyhow::{Context, Result};
use clap::Parser;
use hatidata_core::{Backend, Dispatcher, LocalEngine, RemoteClient, RemoteConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hatidata-mcp-server")]
#[command(about = "HatiData MCP server (stdio transport)")]
#[command(version)]
struct Args {
    /// Remote backend host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Remote backend port
    #[arg(long, default_value_t = 5439)]
    port: u16,

    /// Default agent ID for tools that require one
    #[arg(long, default_value = "mcp-agent")]
    agent_id: String,

    /// Database name (remote backend only)
    #[arg(long, default_value = "hatidata")]
    database: String,

    /// Username (remote backend only)
    #[arg(long, default_value = "agent")]
    user: String,

    /// Password (remote backend only; HATIDATA_API_KEY is used when empty)
    #[arg(long, default_value = "")]
    password: String,

    /// Use the local embedded engine instead of a remote backend
    #[arg(long)]
    local: bool,

    /// Database file for local mode
    #[arg(long, default_value = ".hati/local.duckdb")]
    db_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    hatidata_core::logging::init("info");
    tracing::info!(local = args.local, agent_id = %args.agent_id, "hatidata-mcp-server starting");

    let backend = if args.local {
        let engine =
            LocalEngine::open(&args.db_path).context("failed to open local database")?;
        Backend::Local(engine)
    } else {
        let password = if args.password.is_empty() {
            std::env::var("HATIDATA_API_KEY").unwrap_or_default()
        } else {
            args.password.clone()
        };
        let config = RemoteConfig {
            host: args.host.clone(),
            port: args.port,
            database: args.database.clone(),
            user: args.user.clone(),
            password,
            agent_id: args.agent_id.clone(),
        };
        let client =
            RemoteClient::connect(&config).context("failed to connect to remote backend")?;
        Backend::Remote(client)
    };

    let dispatcher = Dispatcher::new(backend, args.agent_id);
    hatidata_core::server::run_stdio(&dispatcher).context("server loop failed")?;

    Ok(())
}
