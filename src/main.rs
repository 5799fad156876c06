use tracing_subscriber::EnvFilter;

use veilgate::config::GateConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GateConfig::from_env()?;
    veilgate::server::start(config).await?;

    Ok(())
}
