//! Status API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::engine::events::PipelineEvent;
use crate::engine::pipeline::{Pipeline, PipelineStatus};
use crate::types::{Signal, TradeLog};

/// Entries kept per list endpoint.
pub const HISTORY_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub pipeline: Arc<Pipeline>,
    pub recent_trades: RwLock<VecDeque<TradeLog>>,
    pub recent_signals: RwLock<VecDeque<Signal>>,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            recent_trades: RwLock::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            recent_signals: RwLock::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            started_at: Utc::now(),
        }
    }

    /// Fold one pipeline event into the history lists.
    pub async fn record(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::TradeLogged(log) => push_capped(&self.recent_trades, log.clone()).await,
            PipelineEvent::SignalReceived(signal) => {
                push_capped(&self.recent_signals, signal.clone()).await
            }
            _ => {}
        }
    }
}

async fn push_capped<T>(list: &RwLock<VecDeque<T>>, item: T) {
    let mut list = list.write().await;
    if list.len() == HISTORY_LIMIT {
        list.pop_front();
    }
    list.push_back(item);
}

/// Subscribe to the pipeline's events and record them until the bus closes.
pub fn spawn_recorder(state: AppState) -> JoinHandle<()> {
    let mut rx = state.pipeline.events().subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => state.record(&event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Dashboard recorder lagged behind the event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub pipeline: PipelineStatus,
    pub uptime_secs: i64,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

pub type AppState = Arc<DashboardState>;

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let pipeline = state.pipeline.status().await;
    Json(StatusResponse {
        pipeline,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/trades
pub async fn get_trades(State(state): State<AppState>) -> Json<Vec<TradeLog>> {
    let trades = state.recent_trades.read().await;
    Json(trades.iter().cloned().collect())
}

/// GET /api/signals
pub async fn get_signals(State(state): State<AppState>) -> Json<Vec<Signal>> {
    let signals = state.recent_signals.read().await;
    Json(signals.iter().cloned().collect())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
