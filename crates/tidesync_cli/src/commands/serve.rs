//! Serve command implementation.

use std::net::SocketAddr;
use std::path::PathBuf;
use tidesync_server::{ServerConfig, SyncServer};
use tracing::info;

/// Builds the server configuration: environment first, then flags.
pub fn config(
    bind: Option<SocketAddr>,
    database: Option<PathBuf>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::from_env()?;
    if let Some(addr) = bind {
        config = config.with_bind_addr(addr);
    }
    if let Some(path) = database {
        config = config.with_database(path);
    }
    Ok(config)
}

/// Runs the serve command until interrupted.
pub fn run(
    bind: Option<SocketAddr>,
    database: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = config(bind, database)?;
    match &config.database_path {
        Some(path) => info!(database = %path.display(), "using SQLite log"),
        None => info!("using in-memory log"),
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let server = SyncServer::open(config)?;
        tokio::select! {
            result = server.serve() => result?,
            _ = tokio::signal::ctrl_c() => info!("shutting down"),
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
