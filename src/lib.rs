pub mod api;
pub mod config;
pub mod downloader;
pub mod logging;

use api::{ApiServer, AppState};
use config::AppConfig;

/// Load config, wire the components and serve until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let config = AppConfig::from_env_or_default();
    tracing::info!(
        address = %config.socket_address(),
        mode = %config.extractor_mode,
        staging = %config.staging_dir.display(),
        max_processes = config.max_processes,
        "Starting rendition server"
    );

    let state = AppState::from_config(&config).await?;
    match state.extractor.version().await {
        Some(version) => tracing::info!(extractor = state.extractor.name(), %version, "Extractor ready"),
        None => tracing::warn!(
            extractor = state.extractor.name(),
            "Extractor did not report a version, transfers will fail until it is installed"
        ),
    }

    let server = ApiServer::new(config, state);
    let shutdown = server.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    server.run().await
}
