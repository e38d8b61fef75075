//! HTTP API gateway for simguide.
//!
//! Exposes the chat endpoint plus health and stats, wrapped in CORS, a
//! request body limit, per-client rate limiting and HTTP trace logging.
//!
//! Built on Axum.

pub mod api;
pub mod error;

use axum::extract::{ConnectInfo, DefaultBodyLimit};
use axum::{
    Router,
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    routing::{get, post},
};
use simguide_assistant::RequestCoordinator;
use simguide_config::{AppConfig, GatewayConfig};
use simguide_core::CompletionClient;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

pub use error::ApiError;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub coordinator: Arc<RequestCoordinator>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl GatewayState {
    pub fn new(coordinator: Arc<RequestCoordinator>) -> Self {
        Self {
            coordinator,
            start_time: chrono::Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes and layers.
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    let mut app = Router::new()
        .route("/chat", post(api::chat_handler))
        .route("/health", get(api::health_handler))
        .route("/stats", get(api::stats_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.body_limit_bytes));

    if config.rate_limit_per_minute > 0 {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_per_minute,
            Duration::from_secs(60),
        ));
        app = app.layer(middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            rate_limit_middleware(limiter, req, next)
        }));
    }

    app.layer(cors_layer(&config.allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Configured origins, or any origin when none are configured.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600))
}

/// Build the coordinator state from config around an upstream client.
///
/// Starts the cache sweeper when `cache.sweep_interval_secs` is non-zero.
pub fn build_state(config: &AppConfig, client: Arc<dyn CompletionClient>) -> SharedState {
    let coordinator = Arc::new(RequestCoordinator::from_config(config, client));

    if config.cache.sweep_interval_secs > 0 {
        coordinator
            .cache()
            .spawn_sweeper(Duration::from_secs(config.cache.sweep_interval_secs));
    }

    Arc::new(GatewayState::new(coordinator))
}

/// Start the gateway HTTP server and run until Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.require_api_key()?;

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let client = simguide_providers::build_from_config(&config)?;
    match client.health_check().await {
        Ok(true) => info!(upstream = client.name(), model = %config.model, "Upstream reachable"),
        Ok(false) => warn!(upstream = client.name(), "Upstream answered the health probe with an error"),
        Err(e) => warn!(upstream = client.name(), error = %e, "Upstream health probe failed"),
    }

    let app = build_router(build_state(&config, client), &config.gateway);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C; shutting down");
        return;
    }
    info!("Ctrl-C received, draining in-flight requests");
}

// --- Rate Limiter ---

/// Simple in-memory sliding-window rate limiter.
///
/// Tracks request timestamps per client key.
/// Thread-safe via `std::sync::Mutex` (non-async, held briefly).
struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: std::sync::Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Check if the client is within rate limits. Returns `true` if allowed.
    fn check(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        if clients.len() > 10_000 {
            clients.retain(|_, timestamps| {
                timestamps
                    .last()
                    .is_some_and(|t| now.duration_since(*t) < self.window)
            });
        }

        let timestamps = clients.entry(client_key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push(now);
        true
    }
}

/// Client key: first `X-Forwarded-For` hop, else the peer address, else
/// "anonymous". `/health` is exempt.
async fn rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let client_key = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "anonymous".to_string());

    if !limiter.check(&client_key) {
        warn!(client = %client_key, "Rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(req).await)
}
