use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ccf_backend::{build_backend, BackendConfig};
use ccf_core::config::env_opt;
use ccf_db::{MemoryStore, MetadataStore, PgStore};
use ccf_events::{ChangeFeed, CompletionInbox};
use ccf_orchestrator::{Orchestrator, OrchestratorConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ccf_api::config::ServerConfig;
use ccf_api::router::build_app_router;
use ccf_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ccf_api=debug,ccf_orchestrator=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if env_opt("LOG_FORMAT").as_deref() == Some("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let orchestrator_config =
        OrchestratorConfig::from_env().expect("Invalid orchestrator configuration");
    let backend_config = BackendConfig::from_env().expect("Invalid execution backend configuration");
    tracing::info!(
        host = %config.host,
        port = config.port,
        backend = ?backend_config.kind,
        "Loaded configuration",
    );

    // --- Metadata store ---
    let feed = Arc::new(ChangeFeed::default());
    let store: Arc<dyn MetadataStore> = match env_opt("DATABASE_URL") {
        Some(database_url) => {
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
            Arc::new(PgStore::new(pool, Arc::clone(&feed)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store; data is lost on exit");
            Arc::new(MemoryStore::new(Arc::clone(&feed)))
        }
    };

    // --- Execution backend ---
    let inbox = Arc::new(CompletionInbox::default());
    let backend = build_backend(&backend_config, Arc::clone(&inbox))
        .expect("Failed to build execution backend");

    // --- Orchestrator ---
    let orchestrator = Orchestrator::new(Arc::clone(&store), backend, orchestrator_config);
    let reconcilers = orchestrator.spawn_reconcilers(&inbox);

    let state = AppState {
        store,
        orchestrator,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping reconcilers");
    reconcilers
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    tracing::info!("Graceful shutdown complete");
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
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
