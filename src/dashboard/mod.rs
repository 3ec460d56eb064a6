//! Dashboard — read-only JSON status API over Axum.
//!
//! Exposes the pipeline's live status plus the most recent trade logs and
//! feed signals. CORS enabled for local tooling.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub use routes::{spawn_recorder, AppState, DashboardState};

/// Bind the port and serve in a background task.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Status API listening on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Status API server error");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/trades", get(routes::get_trades))
        .route("/api/signals", get(routes::get_signals))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::paper::PaperBroker;
    use crate::config::PaperConfig;
    use crate::engine::pipeline::{Pipeline, PipelineOptions};
    use crate::types::{Direction, Signal};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(auto_trade: bool) -> AppState {
        let broker = Arc::new(PaperBroker::new(&PaperConfig::default()));
        let pipeline = Pipeline::new(
            broker,
            PipelineOptions {
                auto_trade,
                ..PipelineOptions::default()
            },
        );
        Arc::new(DashboardState::new(Arc::new(pipeline)))
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state(false));
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let json = get_json(build_router(test_state(true)), "/api/status").await;
        assert_eq!(json["broker"], "paper");
        assert_eq!(json["auto_trade"], true);
        assert_eq!(json["session"], "Idle");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = build_router(test_state(false));
        let resp = app
            .oneshot(Request::builder().uri("/api/cycles").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_recorder_feeds_trades_and_signals() {
        let state = test_state(true);
        let recorder = spawn_recorder(state.clone());

        state
            .pipeline
            .enqueue(Signal::new("EUR/USD", Direction::Buy, "00:00:15", "test"))
            .unwrap();

        let mut trades = serde_json::Value::Null;
        for _ in 0..100 {
            trades = get_json(build_router(state.clone()), "/api/trades").await;
            if trades.as_array().is_some_and(|t| !t.is_empty()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(trades[0]["pair"], "EUR/USD");
        assert_eq!(trades[0]["result"], "Pending");

        let signals = get_json(build_router(state.clone()), "/api/signals").await;
        assert_eq!(signals.as_array().map(Vec::len), Some(1));

        recorder.abort();
    }
}
