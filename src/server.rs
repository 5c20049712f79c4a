// HTTP front door for the netprobe server
//
// Routes:
// - <ws_path> (default /ws): rate-limited WebSocket upgrade, one session per connection
// - /health: liveness
// - /metrics: Prometheus scrape endpoint (when enabled)

use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Request, State, WebSocketUpgrade},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::metrics;
use crate::probe::ProbeExecutor;
use crate::rate_limit::RateLimiter;
use crate::session::{Session, SessionConfig};

/// How long shutdown waits for open sessions to tear down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    executor: Arc<ProbeExecutor>,
    limiter: RateLimiter,
    session: SessionConfig,
    shutdown: CancellationToken,
    sessions: TaskTracker,
}

impl AppState {
    pub fn new(config: &Config, shutdown: CancellationToken) -> Self {
        Self {
            executor: Arc::new(ProbeExecutor::new(config.executor_config())),
            limiter: RateLimiter::new(config.rate_limit.clone()),
            session: config.session.clone(),
            shutdown,
            sessions: TaskTracker::new(),
        }
    }
}

/// Build the application router
pub fn router(state: AppState, config: &Config) -> Router {
    let ws_route = get(ws_handler).route_layer(middleware::from_fn_with_state(state.clone(), admission));

    let mut app = Router::new()
        .route(&config.server.ws_path, ws_route)
        .route("/health", get(health_handler));

    if config.metrics.enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.with_state(state).layer(TraceLayer::new_for_http())
}

/// Bind `server.bind` and serve until `shutdown` fires
pub async fn serve(config: Config, shutdown: CancellationToken) -> Result<()> {
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    serve_with_listener(listener, config, shutdown).await
}

/// Serve on an already-bound listener until `shutdown` fires.
///
/// Firing `shutdown` stops accepting connections and closes every open
/// session.
pub async fn serve_with_listener(
    listener: TcpListener,
    config: Config,
    shutdown: CancellationToken,
) -> Result<()> {
    if config.metrics.enabled {
        metrics::init().context("Failed to initialize metrics")?;
    }

    let state = AppState::new(&config, shutdown.clone());
    let sessions = state.sessions.clone();
    let sweeper = state.limiter.spawn_sweeper(shutdown.clone());
    let app = router(state, &config);

    let local_addr = listener.local_addr().context("Failed to read local address")?;
    info!(addr = %local_addr, ws_path = %config.server.ws_path, "netprobe listening");

    let stop = shutdown.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
        .context("Server error")?;

    sessions.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, sessions.wait()).await.is_err() {
        warn!(remaining = sessions.len(), "Sessions still open after shutdown grace");
    }
    let _ = sweeper.await;

    info!("netprobe stopped");
    Ok(())
}

/// Admission gate: one token per connection attempt, keyed by client IP
async fn admission(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let result = state.limiter.check(&peer.ip().to_string());
    if result.allowed {
        return next.run(request).await;
    }

    metrics::ADMISSIONS_THROTTLED_TOTAL.inc();
    let retry_after = result.retry_after.unwrap_or_default().as_secs().max(1);
    warn!(peer = %peer, retry_after, "Connection throttled");

    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after.to_string())],
        Json(json!({"error": "too many requests"})),
    )
        .into_response()
}

/// Upgrade to a WebSocket and run one session on it
async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| {
        let session = Session::new(state.session.clone(), state.executor.clone(), &state.shutdown);
        let span = info_span!("session", session_id = %session.id(), peer = %peer);
        state.sessions.track_future(
            async move {
                session.run(socket).await;
            }
            .instrument(span),
        )
    })
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}
