//! SchemaFlow Migrate - Safe Schema Migration Pipeline
//!
//! Diff two schema snapshots, synthesize reversible SQL, validate it, test it
//! in a sandbox and route it through review before anything touches a real
//! database.

use schemaflow_migrate::config::Settings;
use schemaflow_migrate::routes::create_router;
use schemaflow_migrate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting SchemaFlow Migrate...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");
    info!(
        "🧪 Sandbox TTL {:?}, limit {}; review TTL {:?}, auto-approve at {}",
        settings.pipeline.sandbox.ttl,
        settings.pipeline.sandbox.max_sandboxes,
        settings.pipeline.review.ttl,
        settings.pipeline.review.auto_approve_threshold,
    );

    let state = Arc::new(AppState::new(settings.clone()));

    // Build the router
    let app = create_router(Arc::clone(&state), &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── SQL ───");
    info!("   POST   /api/sql/validate                 - Static safety validation");
    info!("   POST   /api/sql/sanitize                 - Strip comments, collapse whitespace");
    info!("");
    info!("   ─── Migrations ───");
    info!("   POST   /api/migrations/generate          - Diff schemas, synthesize up/down");
    info!("   POST   /api/migrations/validate-rollback - Check a down script");
    info!("");
    info!("   ─── Sandbox ───");
    info!("   POST   /api/sandbox/execute              - Run SQL in a fresh sandbox");
    info!("   POST   /api/sandbox/test-migration       - Apply up, then down");
    info!("   POST   /api/sandbox/test-regression      - Apply up, then test queries");
    info!("   DELETE /api/sandbox/{{id}}                 - Remove one sandbox");
    info!("   DELETE /api/sandbox                      - Remove every sandbox");
    info!("");
    info!("   ─── Reviews ───");
    info!("   POST   /api/reviews                      - Request a review");
    info!("   GET    /api/reviews                      - List pending reviews");
    info!("   GET    /api/reviews/{{id}}                 - Get a review");
    info!("   POST   /api/reviews/{{id}}/decision        - Approve, reject or modify");
    info!("");
    info!("   GET    /api/audit                        - Audit history");
    info!("   POST   /api/pipeline/run                 - Whole pipeline in one call");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.pipeline.dispose();
    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,schemaflow_migrate=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
