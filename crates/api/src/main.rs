use anyhow::Context;

use fees_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fees_observability::init();

    let config = ApiConfig::from_env().context("invalid configuration")?;
    let services = fees_api::app::services::build_services(&config)
        .await
        .context("failed to wire services")?;
    let registry = services.registry.clone();

    let app = fees_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    registry.shutdown().await;
    Ok(())
}
