use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use crate::aggregator::{Report, ReportMode};
use crate::store::RecordStore;
use crate::AppState;

use super::AppError;

#[derive(Debug, Default, Deserialize)]
pub struct ReportParams {
    /// Lower bound, exclusive, in ms since the epoch
    pub since: Option<i64>,
    pub mode: Option<ReportMode>,
}

// ─── GET /rest/hits?since=<ms>&mode=<mode> ───────────────────────

pub async fn get_hits<S: RecordStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ReportParams>,
) -> Result<Json<Report>, AppError> {
    let since = params
        .since
        .ok_or_else(|| AppError::BadRequest("missing 'since' (ms since epoch)".into()))?;
    let mode = params.mode.unwrap_or(state.report_mode);

    Ok(Json(state.aggregator.query(since, mode).await?))
}

// ─── GET /rest/display ───────────────────────────────────────────
/// Hits stored since the previous call. The cursor only moves forward to
/// the newest record returned, so a failed poll loses nothing and no record
/// is reported twice.

pub async fn display_hits<S: RecordStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ReportParams>,
) -> Result<Json<Report>, AppError> {
    let mode = params.mode.unwrap_or(state.report_mode);

    let mut cursor = state.poll_cursor.lock().await;
    let report = state.aggregator.query(*cursor, mode).await?;
    if let Some(latest) = report.latest() {
        *cursor = latest;
    }

    Ok(Json(report))
}

// ─── GET /rest/stream ────────────────────────────────────────────
/// Server-Sent Events endpoint for the dashboard.
/// Pushes the hits stored since the previous event every `stream_interval`;
/// each connection keeps its own cursor, starting at `since` or now. A report
/// that cannot be sent leaves the cursor where it was.

pub async fn report_stream<S: RecordStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ReportParams>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let mode = params.mode.unwrap_or(state.report_mode);
    let start = params
        .since
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
    let cursor = Arc::new(tokio::sync::Mutex::new(start));

    let interval = tokio::time::interval(state.stream_interval);

    let stream = IntervalStream::new(interval)
        .then(move |_| {
            let state = Arc::clone(&state);
            let cursor = Arc::clone(&cursor);
            async move {
                if state.is_shutting_down() {
                    return None;
                }
                let mut cursor = cursor.lock().await;
                let event = match state.aggregator.query(*cursor, mode).await {
                    Ok(report) => match Event::default().event("report").json_data(&report) {
                        Ok(event) => {
                            if let Some(latest) = report.latest() {
                                *cursor = latest;
                            }
                            event
                        }
                        Err(e) => Event::default().event("error").data(e.to_string()),
                    },
                    Err(e) => Event::default().event("error").data(e.to_string()),
                };
                Some(Ok::<_, Infallible>(event))
            }
        })
        // Ends the feed once shutdown starts
        .map_while(|event| event);

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
