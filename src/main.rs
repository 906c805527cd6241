use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use hexhold::loops::{self, LoggingFaultSink};
use hexhold::{MemoryKv, MemorySink, Shutdown, WorldConfig, WorldEngine};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = WorldConfig::from_env();
    info!(
        chunk_size = config.chunk_size,
        recharge_interval_ms = config.recharge_interval_ms,
        snapshot_interval_ms = config.snapshot_interval_ms,
        "starting world engine"
    );

    // Dev wiring: in-process store and sink. Production swaps in the Redis
    // and Postgres adapters behind the same traits.
    let engine = Arc::new(WorldEngine::new(
        MemoryKv::new(),
        MemorySink::new(),
        config,
    ));

    let shutdown = Shutdown::new();
    let handles = loops::spawn(engine, Arc::new(LoggingFaultSink), shutdown.token());
    info!("world engine ready");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping loops");
    shutdown.trigger();
    handles.join().await;
    info!("world engine stopped");
    Ok(())
}
