use anyhow::Context;

use shopforge_infra::ProvisioningConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shopforge_observability::init();

    let config = ProvisioningConfig::from_env().context("loading SHOPFORGE_* configuration")?;
    let services = shopforge_api::app::services::build_services(&config)?;
    let app = shopforge_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
