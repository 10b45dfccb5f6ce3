//! HTTP ingest server
//!
//! Receives KubeArmor events as JSON on `POST /` and hands each one to the
//! output registry on a background task, so the sender gets its response as
//! soon as the event parses. The same router serves health, Prometheus and
//! statistics endpoints.
//!
//! | Route          | Response                                  |
//! |----------------|-------------------------------------------|
//! | `POST /`       | 200 once queued, 400 on an invalid body   |
//! | `GET /ping`    | `pong`                                    |
//! | `GET /healthz` | `{"status":"ok"}`                         |
//! | `GET /metrics` | Prometheus text format                    |
//! | `GET /debug/vars` | per-output `total`/`ok`/`error`        |

use crate::error::Result;
use crate::event::KubearmorEvent;
use crate::metrics;
use crate::registry::OutputRegistry;
use crate::stats::Statistics;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared state of the ingest server
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<OutputRegistry>,
    pub statistics: Arc<Statistics>,
}

/// Build the gateway router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(ingest_handler))
        .route("/ping", get(ping_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/debug/vars", get(stats_handler))
        .with_state(state)
}

/// Serve the router on `addr` until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Ingest server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Handler for `POST /`
async fn ingest_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "Please send a valid request body".to_string());
    }

    let event: KubearmorEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Rejected malformed event");
            return (StatusCode::BAD_REQUEST, format!("invalid event: {e}"));
        }
    };

    metrics::try_record_received();
    debug!(event_type = %event.event_type, hostname = %event.hostname, "Event received");

    let registry = Arc::clone(&state.registry);
    tokio::spawn(async move {
        registry.post_to_all(&event).await;
    });

    (StatusCode::OK, String::new())
}

/// Handler for `GET /ping`
async fn ping_handler() -> &'static str {
    "pong\n"
}

/// Handler for `GET /healthz`
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Handler for `GET /metrics`
async fn metrics_handler() -> impl IntoResponse {
    let body = metrics::gather();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Handler for `GET /debug/vars`
async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.statistics.snapshot())
}
