//! HTTP/WS control surface.
//!
//! A thin axum layer over the control plane: JSON in, JSON out, errors
//! rendered as `{"error": "..."}` with the status mapped from the error
//! taxonomy. The live stream rides a websocket upgrade at `/ws`.

pub mod handlers;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::control::ControlPlane;
use crate::error::Result;

pub fn router(control: Arc<ControlPlane>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/threads", get(handlers::list_threads).post(handlers::create_thread))
        .route("/threads/{id}", get(handlers::get_thread))
        .route("/threads/{id}/events", get(handlers::thread_events))
        .route("/threads/{id}/runs", post(handlers::create_run))
        .route("/threads/{id}/diff", get(handlers::thread_diff))
        .route(
            "/threads/{id}/comments",
            get(handlers::list_comments).post(handlers::create_comment),
        )
        .route(
            "/threads/{id}/rerun-from-comments",
            post(handlers::rerun_from_comments),
        )
        .route("/runs/{id}", get(handlers::get_run))
        .route("/runs/{id}/control", post(handlers::control_run))
        .route(
            "/automations",
            get(handlers::list_automations).post(handlers::create_automation),
        )
        .route("/automations/{id}/toggle", post(handlers::toggle_automation))
        .route("/automations/{id}/run-now", post(handlers::run_automation_now))
        .route("/ws", get(ws::upgrade))
        .layer(CorsLayer::permissive())
        .with_state(control)
}

/// Serve the control plane until ctrl-c, then cancel the scheduler, signal
/// running runs, and let the queue finalize them.
pub async fn serve(control: Arc<ControlPlane>) -> Result<()> {
    let addr = format!("{}:{}", control.config.host, control.config.port);

    let scheduler_cancel = CancellationToken::new();
    let scheduler = control.scheduler();
    let scheduler_task = {
        let cancel = scheduler_cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    let app = router(Arc::clone(&control));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("ralph listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&control), scheduler_cancel))
        .await?;

    scheduler_task.abort();
    Ok(())
}

async fn shutdown_signal(control: Arc<ControlPlane>, scheduler_cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::info!("shutdown requested; cancelling running runs");
    scheduler_cancel.cancel();
    control.shutdown();
}
