use anyhow::Context;
use tracing_subscriber::EnvFilter;

use mercato::{App, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(addr = %config.bind_addr, warehouse = %config.warehouse_url, "starting mercato");

    let app = App::build(&config).context("failed to assemble service")?;
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr))?;

    axum::serve(listener, app.router.clone())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    app.shutdown().await;
    tracing::info!("bye");
    Ok(())
}
