use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use cronhook_core::CronhookConfig;
use cronhook_scheduler::{HttpExecutor, SchedulerEngine, SchedulerHandle, SqliteJobStore};

mod app;
mod http;

#[derive(Debug, Parser)]
#[command(name = "cronhook-gateway", version, about = "HTTP job scheduler")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, env = "CRONHOOK_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cronhook_gateway=info,cronhook_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    // load config: --config > CRONHOOK_CONFIG env > ~/.cronhook/cronhook.toml
    let args = Args::parse();
    let config = CronhookConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        CronhookConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(&db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    cronhook_scheduler::db::init_db(&db)?;
    info!("database migrations complete");

    // management handle for the HTTP API, store for the engine; separate connections
    let scheduler = SchedulerHandle::new(rusqlite::Connection::open(&db_path)?)?;
    let store = Arc::new(SqliteJobStore::new(rusqlite::Connection::open(&db_path)?)?);
    let executor = Arc::new(HttpExecutor::new(config.scheduler.request_timeout()));
    let engine = SchedulerEngine::new(store, executor, config.scheduler.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.clone().run(shutdown_rx));

    let state = Arc::new(app::AppState::new(config, scheduler, engine));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("cronhook gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // signal scheduler to stop
    let _ = shutdown_tx.send(true);
    let _ = engine_task.await;
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
