use std::sync::Arc;

use anyhow::Context;
use common::storage::filesystem::FilesystemBlobStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use filebox_server::build_router;
use filebox_server::config::AppConfig;
use filebox_server::database::init_db;
use filebox_server::index::SeaOrmIndex;
use filebox_server::service::FileService;
use filebox_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = AppConfig::load().context("Failed to load config")?;

    let db = init_db(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to initialize database")?;
    info!(max_connections = config.database.max_connections, "Database connected");

    let blobs = FilesystemBlobStore::new(
        config.storage.volume_root.clone(),
        config.storage.max_blob_size,
    )
    .await
    .with_context(|| {
        format!(
            "Failed to prepare volume at {}",
            config.storage.volume_root.display()
        )
    })?;
    info!(
        volume_root = %config.storage.volume_root.display(),
        max_blob_size = config.storage.max_blob_size,
        compensate_orphans = config.storage.compensate_orphans,
        "Blob store ready"
    );

    let files = FileService::new(Arc::new(blobs), Arc::new(SeaOrmIndex::new(db)))
        .with_orphan_compensation(config.storage.compensate_orphans);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        files: Arc::new(files),
        config,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server running at http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
