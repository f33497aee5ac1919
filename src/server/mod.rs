//! HTTP surface for the Gmail add-on.
//!
//! ```text
//! GET  /                    → liveness message
//! POST /process-email       → analyse one message (or ask for a password)
//! POST /process-document    → unlock and analyse a protected attachment
//! POST /triage              → bulk triage of unread primary mail
//! GET  /summary             → today's top emails
//! GET  /daily_report        → today's digest by category
//! POST /reply/{email_id}    → send a reply in the original thread
//! GET  /dashboard           → category chart
//! ```

mod api;
mod dashboard;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AppError;
use crate::triage::Triage;

/// Router state injected into every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub triage: Arc<Triage>,
    /// Upper bound for `POST /triage`.
    pub triage_max_results: u32,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/",                  get(api::root))
        .route("/process-email",     post(api::process_email))
        .route("/process-document",  post(api::process_document))
        .route("/triage",            post(api::triage))
        .route("/summary",           get(api::summary))
        .route("/daily_report",      get(api::daily_report))
        .route("/reply/{email_id}",  post(api::reply))
        .route("/dashboard",         get(dashboard::dashboard))
        .with_state(state)
}

/// Bind `bind_addr` and serve until `shutdown` is cancelled.
pub async fn serve(bind_addr: &str, state: AppState, shutdown: CancellationToken) -> Result<(), AppError> {
    let router = build_router(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::Server(format!("bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "http server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Server(format!("http server error: {e}")))?;

    info!("http server shut down");
    Ok(())
}
