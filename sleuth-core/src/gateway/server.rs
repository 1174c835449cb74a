//! SSE gateway server built on axum.

use crate::config::GatewayConfig;
use crate::research::{Orchestrator, ResearchEvent};
use crate::types::ModelVariant;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const MIN_QUERY_CHARS: usize = 10;
const MAX_QUERY_CHARS: usize = 2000;

/// Shared state for axum handlers.
pub type SharedGateway = Arc<GatewayState>;

pub struct GatewayState {
    orchestrator: Arc<Orchestrator>,
    config: GatewayConfig,
    started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(orchestrator: Arc<Orchestrator>, config: GatewayConfig) -> Self {
        Self {
            orchestrator,
            config,
            started_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

/// Body of `POST /research`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
}

impl ResearchRequest {
    fn validate(&self) -> Result<(), String> {
        let chars = self.query.trim().chars().count();
        if chars < MIN_QUERY_CHARS {
            return Err(format!(
                "query must be at least {} characters, got {}",
                MIN_QUERY_CHARS, chars
            ));
        }
        if chars > MAX_QUERY_CHARS {
            return Err(format!(
                "query must be at most {} characters, got {}",
                MAX_QUERY_CHARS, chars
            ));
        }
        Ok(())
    }
}

fn error_response(status: StatusCode, error: &str, detail: String) -> Response {
    let body = serde_json::json!({ "error": error, "detail": detail });
    (status, Json(body)).into_response()
}

/// Build the axum router with research, status and health routes.
pub fn router(shared: SharedGateway) -> Router {
    let origins: Vec<HeaderValue> = shared
        .config
        .cors_origin_list()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/research", post(research_handler))
        .route("/research/status", get(status_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

async fn health_handler(State(gw): State<SharedGateway>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": gw.uptime_secs(),
    }))
}

async fn status_handler(State(gw): State<SharedGateway>) -> impl IntoResponse {
    let orchestrator = &gw.orchestrator;
    let options = orchestrator.options();
    Json(serde_json::json!({
        "max_iterations": options.max_iterations,
        "max_critique_loops": options.max_critique_loops,
        "max_queries_per_round": options.max_queries_per_round,
        "reasoning_model": orchestrator.model_name(ModelVariant::Reasoning),
        "fast_model": orchestrator.model_name(ModelVariant::Fast),
        "search_mock_mode": orchestrator.search_is_mock(),
    }))
}

/// Start a research task and stream its events.
async fn research_handler(
    State(gw): State<SharedGateway>,
    body: Result<Json<ResearchRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text());
        }
    };
    if let Err(detail) = request.validate() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_request", detail);
    }

    let query = request.query.trim().to_string();
    info!(query = %query.chars().take(100).collect::<String>(), "Starting research over SSE");

    let handle = gw.orchestrator.spawn(query);
    // Dropping the stream (client disconnect) cancels the task.
    let guard = handle.cancel.drop_guard();
    let stream = handle.events.map(move |event: ResearchEvent| {
        let _ = &guard;
        Ok::<Event, Infallible>(sse_event(&event))
    });

    (
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

fn sse_event(event: &ResearchEvent) -> Event {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .event(event.event_type.as_str())
        .data(payload)
}

/// Start the gateway server on the configured address.
///
/// Runs until the listener fails or the process is stopped.
pub async fn run(gw: SharedGateway) -> Result<(), std::io::Error> {
    let addr = format!("{}:{}", gw.config.host, gw.config.port);
    let app = router(gw);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
