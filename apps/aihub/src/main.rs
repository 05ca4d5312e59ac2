use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let boot = aihub_core::bootstrap_from_env().await?;
    let config = boot.state.config.load_full();

    let app = aihub_router::router(aihub_router::HttpState {
        app: boot.state.clone(),
        storage: boot.storage.clone(),
        registry: boot.registry.clone(),
        pipeline: boot.pipeline.clone(),
    });

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(event = "listening", bind = %bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the monitor loops and wait for them to wind down.
    boot.shutdown.cancel();
    for handle in boot.monitor_handles {
        let _ = handle.await;
    }
    tracing::info!(event = "shutdown_complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!(event = "shutdown_requested");
}
