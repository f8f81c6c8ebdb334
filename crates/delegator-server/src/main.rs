mod broadcaster;
mod config;
mod error;
mod routes;
mod state;

use std::env;
use std::sync::Arc;

use anyhow::Context;
use delegator_core::ClaudeApiWorkerAdapter;
use delegator_core::contingency::ContingencyManager;
use delegator_db::config::DbConfig;
use delegator_db::pool;

use broadcaster::Broadcaster;
use config::ServerConfig;
use state::AppState;

const MIGRATIONS_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../delegator-db/migrations");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let server_config = ServerConfig::from_env();
    let db_config = DbConfig::from_env();

    std::fs::create_dir_all(&server_config.log_dir)?;
    std::fs::create_dir_all(&server_config.backup_dir)?;
    std::fs::create_dir_all(&server_config.circuit_breaker_dir)?;

    pool::ensure_database_exists(&db_config).await?;
    let db_pool = pool::create_pool(&db_config).await?;
    pool::run_migrations(&db_pool, std::path::Path::new(MIGRATIONS_DIR)).await?;

    let broadcaster = Arc::new(Broadcaster::new());

    let api_key = env::var("DELEGATOR_ANTHROPIC_API_KEY")
        .context("DELEGATOR_ANTHROPIC_API_KEY must be set")?;
    let adapter: Arc<dyn delegator_core::WorkerAdapter> = Arc::new(ClaudeApiWorkerAdapter::new(api_key));

    let contingency = Arc::new(ContingencyManager::new(
        db_pool.clone(),
        Arc::clone(&broadcaster) as Arc<dyn delegator_core::EventNotifier>,
        server_config.backup_dir.clone(),
        server_config.circuit_breaker_dir.clone(),
        db_config.database_url.clone(),
    ));
    tokio::spawn(Arc::clone(&contingency).run_forever());

    let bind_address = server_config.bind_address.clone();
    let port = server_config.port;

    let app_state = AppState::new(
        db_pool,
        broadcaster,
        adapter,
        Arc::new(server_config.clone()),
        contingency,
    );

    let app = routes::router(&server_config).with_state(app_state);

    let listener = tokio::net::TcpListener::bind((bind_address.as_str(), port)).await?;
    tracing::info!(address = %bind_address, port, "delegator-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
