use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::flusher::FlushScheduler;
use crate::handlers::{hits, reports};
use crate::middleware::timing;
use crate::store::RecordStore;
use crate::tracker::HitTracker;
use crate::AppState;

/// How long open connections may keep draining after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Builds the full Axum `Router` with all routes, middleware, and static serving.
pub fn create_router<S: RecordStore>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        // ── Write side ──────────────────────────────────────────
        .route("/rest/add", get(hits::add_hit::<S>).post(hits::add_hit::<S>))
        .route("/rest/flush", post(hits::flush_now::<S>))
        .route("/rest/status", get(hits::gear_status::<S>))
        // ── Read side ───────────────────────────────────────────
        .route("/rest/hits", get(reports::get_hits::<S>))
        .route("/rest/display", get(reports::display_hits::<S>))
        .route("/rest/stream", get(reports::report_stream::<S>))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Serve static/ directory for the dashboard ───────────
        .fallback_service(ServeDir::new("static"))
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}

/// Runs one gear on `store` until Ctrl-C, then stops the flush scheduler
/// and makes a last best-effort flush.
pub async fn run<S: RecordStore>(
    config: Config,
    store: S,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = Arc::new(store);

    let tracker = Arc::new(HitTracker::new(
        config.instance_id.clone(),
        Arc::clone(&store),
        config.flush_policy,
        config.skip_empty,
    ));

    let scheduler = config
        .flush_policy
        .interval()
        .map(|interval| FlushScheduler::start(Arc::clone(&tracker), interval));

    let state = Arc::new(AppState::new(
        Arc::clone(&tracker),
        Aggregator::new(store, config.application_name.clone()),
        config.report_mode,
        config.stream_interval,
    ));

    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(
        addr = %config.bind_addr,
        gear = %config.instance_id,
        application = %config.application_name,
        policy = %config.flush_policy,
        skip_empty = config.skip_empty,
        "Serving hit counter"
    );

    let signal_state = Arc::clone(&state);
    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_state.begin_shutdown();
        })
        .into_future();

    // Connections that outlive the grace period must not hold back the
    // final flush
    let mut shutdown = state.shutdown_signal();
    tokio::select! {
        result = serve => result?,
        _ = async {
            let _ = shutdown.wait_for(|stopping| *stopping).await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            tracing::warn!(
                grace_ms = SHUTDOWN_GRACE.as_millis() as u64,
                "Connections still open after grace period, shutting down anyway"
            );
        }
    }

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    match tracker.flush().await {
        Ok(Some(record)) => tracing::info!(hits = record.hits, "Final flush written"),
        Ok(None) => tracing::info!("Nothing pending at shutdown"),
        Err(e) => tracing::error!(
            error = %e,
            lost_hits = tracker.pending(),
            "Final flush failed"
        ),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
