use anyhow::Result;
use mynah_agents::{ServerConfig, WorkerOptions, cli};
use mynah_worker::assistant;
use mynah_worker::config::WorkerConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::rfc_3339())
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("启动 LiveKit Agent Worker...");
    let config = WorkerConfig::from_env()?;
    let options = WorkerOptions::new("mynah-assistant", assistant::entrypoint);
    let server = ServerConfig {
        url: config.url,
        api_key: config.api_key,
        api_secret: config.api_secret,
    };
    cli::run_app(options, server).await
}
