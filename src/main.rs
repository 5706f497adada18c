use anyhow::Result;
use axum::Router;
use codeintel_upload::{
    config,
    models::metadata::IndexMetadata,
    routes,
    services::{
        enqueue_service::EnqueueService, fs_object_store::FilesystemObjectStore,
        metadata_extractor::QueryMetadataExtractor, sqlite_store::SqliteUploadStore,
    },
};
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting codeintel-upload with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    // Create parent directory if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let uploads = SqliteUploadStore::connect(db_url, cfg.max_connections).await?;

    // --- Handle migration mode ---
    if migrate {
        uploads.migrate().await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize object store (creates the storage directory) ---
    let objects = FilesystemObjectStore::new(&cfg.storage_dir).await?;
    tracing::info!("Staging upload payloads under {}", cfg.storage_dir);

    // --- Initialize core service ---
    let service: EnqueueService<IndexMetadata> = EnqueueService::new(
        Arc::new(uploads),
        Arc::new(objects),
        Arc::new(QueryMetadataExtractor),
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
