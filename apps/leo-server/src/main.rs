//! LEO server entry point.
//!
//! Configuration comes from `LEO_HOST`, `LEO_PORT`, `LEO_STORAGE`,
//! `LEO_USER` and `LEO_PASS`; logs are JSON lines, filtered by `RUST_LOG`.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use leo_server::{Server, ServerConfig};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        storage = %config.storage_path.display(),
        "starting LEO server"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("server shut down cleanly");
    Ok(())
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let server = Server::new(config)?;

    let accept_loop = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");
    server.shutdown();

    accept_loop.await??;
    Ok(())
}
