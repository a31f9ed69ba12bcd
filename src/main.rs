use crate::app_config::AppConfig;
use crate::domain::command_runner::CommandRunner;
use crate::domain::events::LightEvent;
use crate::light::runner::LightCommandRunner;
use crate::light::scanner::DiscoveryScanner;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task;
use tracing::info;

mod app_config;
mod domain;
mod light;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    info!("🪵 Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = Arc::new(AppConfig::load());
    info!("✅  Loaded configuration");

    let (tx, rx) = mpsc::channel::<LightEvent>(config.core().event_buffer_size());
    let scanner = DiscoveryScanner::new(Arc::clone(&config), tx);
    let runner = Arc::new(LightCommandRunner::new(scanner));

    let listener = Arc::clone(&runner);
    task::spawn(async move {
        listener.listen(rx).await;
    });
    info!("✅  Initialized light event listener");

    runner.init().await;
    runner.connect().await;
    info!("✅  Started light discovery");
    info!("🔥 {} is up and running", env!("CARGO_PKG_NAME"));

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutting down");
    runner.disconnect().await;

    Ok(())
}
