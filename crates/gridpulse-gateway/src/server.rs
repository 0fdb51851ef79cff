//! HTTP server implementation using Axum.

use axum::{
    Json, Router,
    extract::State,
    routing::{delete, get, patch, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use gridpulse_core::config::GridPulseConfig;
use gridpulse_dispatch::{CapabilityRegistry, TaskExecutor, TaskStore};

/// Shared state for the gateway server. Everything the handlers touch is
/// injected here — there is no process-wide singleton.
#[derive(Clone)]
pub struct AppState {
    pub config: GridPulseConfig,
    pub start_time: std::time::Instant,
    pub store: Arc<TaskStore>,
    pub registry: Arc<CapabilityRegistry>,
    pub executor: Arc<TaskExecutor>,
}

impl AppState {
    pub fn new(
        config: GridPulseConfig,
        store: Arc<TaskStore>,
        registry: Arc<CapabilityRegistry>,
        executor: Arc<TaskExecutor>,
    ) -> Self {
        Self {
            config,
            start_time: std::time::Instant::now(),
            store,
            registry,
            executor,
        }
    }
}

/// API token auth middleware — validates X-Api-Token header or ?token= query.
/// The dispatch core performs no authorization of its own; this gate is the
/// whole story.
async fn require_token(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    // If no token configured, allow all
    let expected = &state.config.gateway.api_token;
    if expected.is_empty() {
        return next.run(req).await;
    }

    // Check header first
    let from_header = req
        .headers()
        .get("X-Api-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if from_header == expected {
        return next.run(req).await;
    }

    // Check query param ?token=
    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(token) = pair.strip_prefix("token=") {
                if token == expected {
                    return next.run(req).await;
                }
            }
        }
    }

    axum::response::Response::builder()
        .status(axum::http::StatusCode::UNAUTHORIZED)
        .header("Content-Type", "application/json")
        .body(axum::body::Body::from(
            serde_json::json!({"ok": false, "error": "Unauthorized — invalid or missing API token"})
                .to_string(),
        ))
        .unwrap()
}

/// Health check endpoint (public).
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "gridpulse-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    // Protected routes — require valid API token
    let protected = Router::new()
        .route("/api/v1/info", get(super::routes::system_info))
        // Task CRUD
        .route("/api/v1/tasks", get(super::routes::list_tasks))
        .route("/api/v1/tasks", post(super::routes::create_task))
        .route("/api/v1/tasks/{id}", get(super::routes::get_task))
        .route("/api/v1/tasks/{id}", patch(super::routes::update_task))
        .route("/api/v1/tasks/{id}", delete(super::routes::delete_task))
        .route(
            "/api/v1/tasks/status/{status}",
            get(super::routes::tasks_by_status),
        )
        .route("/api/v1/tasks/{id}/execute", post(super::routes::execute_task))
        .route("/api/v1/tasks/{id}/cancel", post(super::routes::cancel_task))
        // Capability introspection
        .route("/api/v1/providers", get(super::routes::list_providers))
        // Direct analysis shortcuts (no task row)
        .route(
            "/api/v1/analyze/sentiment",
            post(super::routes::analyze_sentiment),
        )
        .route(
            "/api/v1/analyze/summarize",
            post(super::routes::analyze_summarize),
        )
        .route(
            "/api/v1/analyze/anomalies",
            post(super::routes::analyze_anomalies),
        )
        .route("/api/v1/analyze/trends", post(super::routes::analyze_trends))
        .route("/api/v1/plan/decompose", post(super::routes::plan_decompose))
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_token,
        ));

    // Public routes — no auth
    let public = Router::new().route("/health", get(health_check));

    protected
        .merge(public)
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PATCH,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600));

            // Restrict CORS origins in production via env var
            // Example: GRIDPULSE_CORS_ORIGINS=https://dash.example.com
            if let Ok(origins_str) = std::env::var("GRIDPULSE_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                // Development fallback — allow all origins
                cors.allow_origin(Any)
            }
        })
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server.
pub async fn start(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
