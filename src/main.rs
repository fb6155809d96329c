use std::time::Duration;

use http_ingest::{Config, Server, ServerHandle, StdoutRouter};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let handle = Server::new(cfg, StdoutRouter::new()).start()?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("Shutdown signal received");
        }

        _ = loop_exited(&handle) => {
            tracing::error!("Event loop exited unexpectedly");
        }
    }

    tokio::task::spawn_blocking(move || handle.stop()).await??;
    Ok(())
}

async fn loop_exited(handle: &ServerHandle) {
    while !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
