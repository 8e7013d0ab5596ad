use anyhow::Result;
use axum::Router;
use barrel_gateway::{
    config::{AppConfig, StorageConfig},
    queue::{MemoryQueue, Queuer, WorkerHost},
    repository::sqlite::{self, SqliteBarrelRepository, SqliteFileRepository},
    routes,
    services::{BarrelService, FileService, ReplicationScheduler},
    session::{SessionService, signature::JwtSigner},
    state::AppState,
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting barrel-gateway with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let db = Arc::new(sqlite::connect(db_url, 5).await?);

    // --- Handle migration mode ---
    if migrate {
        sqlite::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Storage drivers ---
    let router = StorageConfig::load(&cfg.storage_config)?.into_router();
    let mut codes: Vec<&str> = router.codes().collect();
    codes.sort_unstable();
    tracing::info!("Loaded storage drivers: {}", codes.join(", "));

    // --- Core services ---
    let shutdown = CancellationToken::new();
    let sessions = SessionService::new(Arc::new(JwtSigner::new(
        cfg.signature_secret.as_bytes(),
    )));
    let barrel_repo = Arc::new(SqliteBarrelRepository::new(db.clone()));
    let file_repo = Arc::new(SqliteFileRepository::new(db.clone()));
    let queue = MemoryQueue::new(cfg.worker_prefetch, shutdown.clone())
        .with_retry_delay(Duration::from_millis(cfg.worker_retry_delay_ms));
    let queuer: Arc<dyn Queuer> = Arc::new(queue.clone());

    let files = FileService::new(
        file_repo,
        barrel_repo.clone(),
        sessions.clone(),
        router.clone(),
        queuer.clone(),
        cfg.app_host.clone(),
    );
    let barrels = BarrelService::new(barrel_repo);

    // --- Background work ---
    WorkerHost::new(queuer, files.clone(), shutdown.clone())
        .start()
        .await?;
    let scheduler = ReplicationScheduler::new(
        files.clone(),
        Duration::from_secs(cfg.scheduler_interval_secs),
        cfg.replication_batch,
    )
    .start_background(shutdown.clone());

    // --- Build router ---
    let state = AppState {
        db,
        files,
        barrels,
        sessions,
        router,
    };
    let app: Router = routes::routes::routes().with_state(state);

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
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    queue.close();
    if let Err(err) = scheduler.await {
        tracing::warn!("Replication scheduler ended abnormally: {}", err);
    }
    tracing::info!("Server stopped");

    Ok(())
}
