//! DeckForge API Gateway
//!
//! The HTTP boundary of the deck analysis pipeline.
//! Handles:
//! - Caller identity and per-user upload rate limiting
//! - Deck submission and validation
//! - Job history, status polling, downloads and deletes
//! - Observability (logging, metrics, tracing)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use deckforge_common::{
    config::{AppConfig, ObservabilityConfig},
    db::create_job_store,
    metrics::{self, LATENCY_BUCKETS, STAGE_BUCKETS},
    storage::{create_object_store, LocalStore, ObjectStore},
};
use deckforge_pipeline::{upload::MAX_UPLOAD_BYTES, DeckProcessor};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, sync::Notify};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use middleware::rate_limit::UploadLimiter;

/// Room for multipart boundaries and headers on top of the deck itself
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// How often idle per-user rate limit buckets are dropped
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub processor: Arc<DeckProcessor>,
    pub upload_limiter: Arc<UploadLimiter>,
    /// Set when reports live on local disk and the gateway serves signed links itself
    pub local_files: Option<Arc<LocalStore>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.observability);
    info!("Starting DeckForge API Gateway v{}", deckforge_common::VERSION);

    install_metrics_exporter(&config.observability)?;
    metrics::register_metrics();

    let state = build_state(config).await?;
    let config = state.config.clone();

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server.host / server.port")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // In-flight submissions get a grace period to reach a terminal status
    let stop = Arc::new(Notify::new());
    let server = axum::serve(listener, app)
        .with_graceful_shutdown({
            let stop = stop.clone();
            async move { stop.notified().await }
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result?,
        _ = shutdown_signal() => {
            stop.notify_one();
            let grace = config.shutdown_timeout();
            match tokio::time::timeout(grace, &mut server).await {
                Ok(result) => result?,
                Err(_) => warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed, dropping open connections"),
            }
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins over `observability.log_level`
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Serve Prometheus metrics on their own port; port 0 turns the exporter off
fn install_metrics_exporter(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("request_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("stage_duration_seconds".to_string()),
            STAGE_BUCKETS,
        )?
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Connect the stores and assemble the processor
async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let store = create_job_store(&config.database).await?;

    let local_files = if config.storage.backend == "local" {
        Some(Arc::new(LocalStore::from_config(&config.storage)?))
    } else {
        None
    };
    let objects: Arc<dyn ObjectStore> = match &local_files {
        Some(local) => local.clone(),
        None => create_object_store(&config.storage).await?,
    };

    tokio::fs::create_dir_all(config.temp_dir())
        .await
        .with_context(|| format!("Failed to create temp dir {}", config.temp_dir().display()))?;

    let processor = DeckProcessor::with_stores(&config, store, objects)?;

    let upload_limiter = Arc::new(UploadLimiter::from_config(&config.rate_limit));
    upload_limiter.clone().spawn_pruning(LIMITER_PRUNE_INTERVAL);

    Ok(AppState {
        upload_limiter,
        config: Arc::new(config),
        processor: Arc::new(processor),
        local_files,
    })
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Submissions run the whole pipeline in-request and are never cut short
    let submit_routes = Router::new()
        .route("/decks", post(handlers::decks::submit_deck))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit::upload_rate_limit,
        ));

    let mut query_routes = Router::new()
        .route("/decks/validate", post(handlers::decks::validate_deck))
        .route("/jobs", get(handlers::jobs::list_jobs))
        .route("/jobs/delete", post(handlers::jobs::delete_jobs))
        .route(
            "/jobs/{id}",
            get(handlers::jobs::get_job).delete(handlers::jobs::delete_job),
        )
        .route("/jobs/{id}/status", get(handlers::jobs::get_job_status))
        .route("/jobs/{id}/download", get(handlers::jobs::download_report));

    if state.local_files.is_some() {
        query_routes = query_routes.route("/files/{*key}", get(handlers::files::serve_file));
    }

    let api_routes = Router::new()
        .merge(submit_routes)
        .merge(query_routes.layer(TimeoutLayer::new(state.config.request_timeout())))
        .route_layer(from_fn(middleware::metrics::track_metrics))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD));

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
