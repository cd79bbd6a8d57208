//! TabFS server binary.
//!
//! Serves the tab filesystem to a filesystem driver over length-prefixed
//! JSON records.
//!
//! Usage:
//!   # stdio (browser native messaging)
//!   cargo run -p tabfs-server
//!
//!   # Unix socket
//!   cargo run -p tabfs-server -- --socket /tmp/tabfs.sock
//!
//!   # Print the route table
//!   cargo run -p tabfs-server -- routes

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use tabfs_kernel::{Config, Dispatcher, MemoryHandleCache, RouteTable, TransportKind};
use tabfs_server::browser::MemoryBrowser;
use tabfs_server::listener::{serve_socket, serve_stdio};
use tabfs_server::routes::build_table_with_handles;

/// Browser tabs as a filesystem.
#[derive(Parser, Debug)]
#[command(name = "tabfs-server")]
#[command(about = "Request router for the tab filesystem")]
struct Args {
    /// Config file (default: ~/.config/tabfs/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Milliseconds before a request is answered with ETIMEDOUT
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Serve on this Unix socket instead of stdio
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG and the config file
    #[arg(long)]
    log: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve requests (the default)
    Serve,
    /// Print every route with its kind and description
    Routes,
}

fn init_tracing(args: &Args, config: &Config) -> Result<()> {
    let filter = match &args.log {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_filter))?,
    };
    // stdout may carry the protocol; logs go to stderr.
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
    Ok(())
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(socket) = &args.socket {
        config.transport = TransportKind::Socket;
        config.socket_path = Some(socket.clone());
    }
}

fn print_routes(table: &RouteTable) {
    for entry in table.entries() {
        println!(
            "{:<44} {:<9} {}  {}",
            entry.pattern.as_str(),
            entry.kind().to_string(),
            entry.pattern.var_count(),
            entry.description.as_deref().unwrap_or("-"),
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    init_tracing(&args, &config)?;

    let browser = Arc::new(MemoryBrowser::demo());
    // Open files are capped at the frame size: nothing larger could be read back.
    let handles = MemoryHandleCache::new()
        .with_max_size(config.max_frame_bytes)
        .into_shared();
    let table = build_table_with_handles(browser, handles)?;
    tracing::info!(routes = table.len(), "route table built");

    if let Some(Command::Routes) = args.command {
        print_routes(&table);
        return Ok(());
    }

    let dispatcher = Arc::new(Dispatcher::new(Arc::new(table)).with_timeout(config.timeout()));
    match config.transport {
        TransportKind::Stdio => serve_stdio(dispatcher, config.max_frame_bytes).await,
        TransportKind::Socket => {
            serve_socket(dispatcher, &config.socket_path(), config.max_frame_bytes).await
        }
    }
}
