use anyhow::Context;

use wsm_infra::ServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wsm_observability::init();

    let config = ServiceConfig::from_env().context("reading configuration")?;
    let manager = wsm_service::build(&config).await?;
    tracing::info!(executor = %manager.executor().config().name, "serving; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    // Unfinished flights are resumed by the next process.
    tracing::info!("shutting down");
    Ok(())
}
