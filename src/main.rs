use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use trackwatch::api;
use trackwatch::app::App;
use trackwatch::config::{DiscordConfig, SoundcloudConfig, WatchConfig};
use trackwatch::cycle;
use trackwatch::messaging::DiscordMessenger;
use trackwatch::source::SoundcloudClient;
use trackwatch::store::LibSqlBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = WatchConfig::from_env()?;
    let soundcloud = SoundcloudConfig::from_env()?;
    let discord = DiscordConfig::from_env()?;

    tracing::info!(
        db = %config.db_path,
        interval = ?config.poll_interval,
        lookback = ?config.lookback,
        "trackwatch v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let store = Arc::new(
        LibSqlBackend::new_local(Path::new(&config.db_path))
            .await
            .context("Failed to open database")?,
    );
    let source = Arc::new(SoundcloudClient::new(soundcloud));
    let messenger = Arc::new(DiscordMessenger::new(discord));

    let bind_addr = config.bind_addr.clone();
    let app = Arc::new(
        App::load(config, store, source, messenger)
            .await
            .context("Failed to load service state")?,
    );

    let (_scheduler, _shutdown) = cycle::spawn_scheduler(Arc::clone(&app));

    let router = api::router(app);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    tracing::info!("Admin API listening on {bind_addr}");
    axum::serve(listener, router)
        .await
        .context("API server exited")?;

    Ok(())
}
