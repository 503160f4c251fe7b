//! Standalone reconciler process.
//!
//! Runs dispatch, completion, polling and retention against PostgreSQL
//! without serving HTTP. Several workers may share one database; the
//! dispatch claim keeps them from submitting the same job twice.

use std::sync::Arc;
use std::time::Duration;

use ccf_backend::{build_backend, BackendConfig};
use ccf_core::config::{env_opt, env_or};
use ccf_db::PgStore;
use ccf_events::{ChangeFeed, CompletionInbox};
use ccf_orchestrator::{Orchestrator, OrchestratorConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ccf_worker=debug,ccf_orchestrator=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if env_opt("LOG_FORMAT").as_deref() == Some("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = OrchestratorConfig::from_env().expect("Invalid orchestrator configuration");
    let backend_config = BackendConfig::from_env().expect("Invalid execution backend configuration");
    let shutdown_timeout: u64 =
        env_or("SHUTDOWN_TIMEOUT_SECS", 30).expect("Invalid SHUTDOWN_TIMEOUT_SECS");

    let database_url = env_opt("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = ccf_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    ccf_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    ccf_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready, migrations applied");

    let feed = Arc::new(ChangeFeed::default());
    let store = Arc::new(PgStore::new(pool, feed));
    let inbox = Arc::new(CompletionInbox::default());
    let backend = build_backend(&backend_config, Arc::clone(&inbox))
        .expect("Failed to build execution backend");

    let orchestrator = Orchestrator::new(store, backend, config);
    let reconcilers = orchestrator.spawn_reconcilers(&inbox);
    tracing::info!(backend = ?backend_config.kind, "Worker started");

    shutdown_signal().await;

    reconcilers
        .shutdown(Duration::from_secs(shutdown_timeout))
        .await;
    tracing::info!("Worker stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
