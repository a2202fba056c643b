use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use embryoscore_core::config::{env_opt, env_parse, env_required};
use embryoscore_core::detection::Detector;
use embryoscore_core::frame::FfmpegFrameSource;
use embryoscore_events::{ChangeListener, EventBus};
use embryoscore_pipeline::PgJobStore;
use embryoscore_worker_client::{WorkerApi, WorkerClientConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use embryoscore_api::config::{LogFormat, ServerConfig};
use embryoscore_api::router::build_app_router;
use embryoscore_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");

    // --- Tracing ---
    let (pretty, json) = match config.log_format {
        LogFormat::Pretty => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "embryoscore_api=debug,embryoscore_pipeline=debug,embryoscore_events=info,tower_http=debug"
                    .into()
            }),
        )
        .with(pretty)
        .with(json)
        .init();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = env_required("DATABASE_URL").expect("DATABASE_URL must be set");
    let max_connections: u32 =
        env_parse("DB_MAX_CONNECTIONS", embryoscore_db::DEFAULT_MAX_CONNECTIONS)
            .expect("DB_MAX_CONNECTIONS must be a valid u32");

    let pool = embryoscore_db::create_pool_with(&database_url, max_connections)
        .await
        .expect("Failed to connect to database");
    tracing::info!(max_connections, "Database connection pool created");

    embryoscore_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    embryoscore_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Worker client ---
    let worker_config = WorkerClientConfig::from_env().expect("Invalid worker configuration");
    let worker = WorkerApi::new(&worker_config).expect("Failed to build worker client");
    tracing::info!(url = %worker_config.url, "Worker trigger configured");

    // --- Detection ---
    let detector = Detector::shared()
        .await
        .expect("Failed to initialise detection backend");
    let frames = match (env_opt("FFMPEG_BIN"), env_opt("FFPROBE_BIN")) {
        (None, None) => FfmpegFrameSource::default(),
        (ffmpeg, ffprobe) => FfmpegFrameSource::with_binaries(
            ffmpeg.unwrap_or_else(|| "ffmpeg".into()),
            ffprobe.unwrap_or_else(|| "ffprobe".into()),
        ),
    };

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();

    let listener_handle = tokio::spawn(
        ChangeListener::new(pool.clone(), Arc::clone(&event_bus)).run(cancel.child_token()),
    );

    // --- App state ---
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let state = AppState::new(
        Arc::new(PgJobStore::new(pool)),
        Arc::new(worker),
        Arc::new(frames),
        detector,
        Some(Arc::clone(&event_bus)),
        config.clone(),
    );

    // Spawn the queue aggregator.
    let aggregator = Arc::clone(&state.aggregator);
    let aggregator_cancel = cancel.child_token();
    let aggregator_handle = tokio::spawn(async move {
        aggregator.run(aggregator_cancel).await;
    });

    tracing::info!("Background services started (change listener, queue aggregator)");

    // --- Router ---
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
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let _ = tokio::time::timeout(shutdown_timeout, aggregator_handle).await;
    let _ = tokio::time::timeout(shutdown_timeout, listener_handle).await;
    drop(event_bus);

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
