use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::metrics::FlushStatsSnapshot;
use crate::store::RecordStore;
use crate::AppState;

use super::AppError;

#[derive(Debug, Serialize)]
pub struct GearStatus {
    pub instance_id: String,
    pub application: String,
    pub flush_policy: String,
    pub skip_empty: bool,
    pub pending_hits: u64,
    pub window_age_ms: u64,
    pub flush: FlushStatsSnapshot,
}

// ─── GET|POST /rest/add ──────────────────────────────────────────

/// Counts one hit on this gear. Always succeeds.
pub async fn add_hit<S: RecordStore>(State(state): State<Arc<AppState<S>>>) -> &'static str {
    state.tracker.add().await;
    "Success"
}

// ─── POST /rest/flush ────────────────────────────────────────────

/// Forces a flush; `204` when the window was empty and skipped.
pub async fn flush_now<S: RecordStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Response, AppError> {
    match state.tracker.flush().await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

// ─── GET /rest/status ────────────────────────────────────────────

pub async fn gear_status<S: RecordStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<GearStatus> {
    let tracker = &state.tracker;
    let window = tracker.window();
    Json(GearStatus {
        instance_id: tracker.instance_id().to_string(),
        application: state.aggregator.application().to_string(),
        flush_policy: tracker.policy().to_string(),
        skip_empty: tracker.skip_empty(),
        pending_hits: window.hits,
        window_age_ms: window.age.as_millis() as u64,
        flush: tracker.stats().snapshot(),
    })
}
