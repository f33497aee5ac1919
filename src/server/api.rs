//! JSON handlers.
//!
//! Errors use the `{"detail": ...}` body the add-on expects; an
//! unauthenticated service answers 503 everywhere Gmail is needed.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};

use super::AppState;
use crate::store::{EmailRecord, start_of_day};
use crate::triage::{ProcessOutcome, TriageError};

const SUMMARY_LIMIT: usize = 10;
const DIGEST_PER_CATEGORY: usize = 3;

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct EmailRequest {
    message_id: String,
    thread_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DocumentRequest {
    message_id: String,
    password: String,
}

#[derive(Deserialize)]
pub(super) struct ReplyRequest {
    reply_body: String,
}

// ── Response types ────────────────────────────────────────────────────────────

/// One `/summary` row as the add-on reads it.
#[derive(Serialize)]
pub(super) struct SummaryItem {
    /// Gmail message id.
    id: String,
    sender: String,
    subject: String,
    summary: String,
    category: String,
    priority: i64,
}

impl From<EmailRecord> for SummaryItem {
    fn from(r: EmailRecord) -> Self {
        Self {
            id: r.email_id,
            sender: r.sender,
            subject: r.subject,
            summary: r.summary,
            category: r.category,
            priority: r.priority_score,
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn detail(status: StatusCode, msg: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "detail": msg.to_string() }))).into_response()
}

fn not_authenticated() -> Response {
    detail(StatusCode::SERVICE_UNAVAILABLE, TriageError::NotAuthenticated)
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /
pub(super) async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "SmartMail Agent API is running!" }))
}

/// POST /process-email
pub(super) async fn process_email(State(state): State<AppState>, Json(req): Json<EmailRequest>) -> Response {
    debug!(message_id = %req.message_id, thread_id = ?req.thread_id, "process-email request");
    match state.triage.process_email(&req.message_id).await {
        Ok(ProcessOutcome::Processed(email)) => Json(email).into_response(),
        Ok(ProcessOutcome::NeedsPassword { filename, id }) => {
            Json(json!({ "status": "needs_password", "filename": filename, "id": id })).into_response()
        }
        Err(TriageError::NotAuthenticated) => not_authenticated(),
        Err(e) => {
            error!(message_id = %req.message_id, error = %e, "process-email failed");
            detail(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get or process email")
        }
    }
}

/// POST /process-document
pub(super) async fn process_document(State(state): State<AppState>, Json(req): Json<DocumentRequest>) -> Response {
    match state.triage.process_document(&req.message_id, &req.password).await {
        Ok(email) => Json(email).into_response(),
        Err(TriageError::NotAuthenticated) => not_authenticated(),
        Err(e) => {
            warn!(message_id = %req.message_id, error = %e, "process-document failed");
            detail(StatusCode::BAD_REQUEST, e)
        }
    }
}

/// POST /triage
pub(super) async fn triage(State(state): State<AppState>) -> Response {
    match state.triage.triage_unread(state.triage_max_results).await {
        Ok(report) => Json(json!({ "message": report })).into_response(),
        Err(TriageError::NotAuthenticated) => not_authenticated(),
        Err(e) => {
            error!(error = %e, "triage failed");
            detail(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// GET /summary: today's records, highest priority first.
pub(super) async fn summary(State(state): State<AppState>) -> Response {
    let since = start_of_day(Utc::now());
    match state.triage.store().top_since(since, SUMMARY_LIMIT) {
        Ok(records) => Json(records.into_iter().map(SummaryItem::from).collect::<Vec<_>>()).into_response(),
        Err(e) => {
            error!(error = %e, "summary query failed");
            detail(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// GET /daily_report
pub(super) async fn daily_report(State(state): State<AppState>) -> Response {
    let since = start_of_day(Utc::now());
    match state.triage.store().digest_since(since, DIGEST_PER_CATEGORY) {
        Ok(digest) if digest.is_empty() => {
            Json(json!({ "message": "No new important emails from today." })).into_response()
        }
        Ok(digest) => Json(digest).into_response(),
        Err(e) => {
            error!(error = %e, "daily report query failed");
            detail(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// POST /reply/{email_id}
pub(super) async fn reply(
    State(state): State<AppState>,
    Path(email_id): Path<String>,
    Json(req): Json<ReplyRequest>,
) -> Response {
    match state.triage.send_reply(&email_id, &req.reply_body).await {
        Ok(details) => Json(json!({ "message": "Reply sent successfully!", "details": details })).into_response(),
        Err(TriageError::NotAuthenticated) => not_authenticated(),
        Err(e) => {
            error!(%email_id, error = %e, "sending reply failed");
            detail(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to send reply: {e}"))
        }
    }
}
