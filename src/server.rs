//! HTTP surface
//!
//! Thin routing layer over the core: resolve the caller's identity from
//! the session cookie, hand the upload stream to the orchestrator, and
//! translate grading failures into the three externally visible outcomes
//! (400 for size/format problems, 500 for internal failures, 200 with the
//! grading result). Routing logic stays here; grading logic stays out.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::error;

use crate::challenge::ChallengeRegistry;
use crate::error::GradeError;
use crate::session::{session_value_from_cookies, IdentityResolver, UserIdentity};
use crate::store::{ScoreStore, UserHistory};
use crate::submission::{GradeOutcome, SubmissionOrchestrator};

/// Fixed message for an upload that crossed the size ceiling.
pub const SIZE_EXCEEDED_MESSAGE: &str = "Upload size too large";

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ChallengeRegistry>,
    pub store: Arc<ScoreStore>,
    pub orchestrator: Arc<SubmissionOrchestrator>,
    pub sessions: Arc<dyn IdentityResolver>,
    pub cookie_name: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/info", get(info))
        .route("/download/{name}", get(download))
        .route("/submit/{name}", post(submit))
        .route("/status", get(status))
        .with_state(state)
}

#[derive(Serialize)]
struct InfoResponse {
    session_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserIdentity>,
}

async fn info(State(state): State<AppState>, headers: HeaderMap) -> Json<InfoResponse> {
    let session_value = session_value(&state, &headers);
    let user = match &session_value {
        Some(value) => state.sessions.resolve(value).await.ok().flatten(),
        None => None,
    };
    Json(InfoResponse {
        session_key: state.cookie_name.clone(),
        session_value,
        user,
    })
}

async fn download(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let challenge = match state.registry.get(&name) {
        Ok(Some(challenge)) => challenge,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("failed to resolve challenge {}: {:#}", name, e);
            return internal_error();
        }
    };

    match challenge.prepare_starter().await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/zip")],
            bytes,
        )
            .into_response(),
        Err(e) => {
            error!("failed to prepare starter for {}: {:#}", name, e);
            internal_error()
        }
    }
}

#[derive(Serialize)]
struct SubmitResponse {
    body: String,
    passed: u32,
    failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    timed_out: bool,
}

async fn submit(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let Some(user) = identity(&state, &headers).await else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let challenge = match state.registry.get(&name) {
        Ok(Some(challenge)) => challenge,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("failed to resolve challenge {}: {:#}", name, e);
            return internal_error();
        }
    };

    let has_hooks = challenge.hooks.is_some();
    let upload = body.into_data_stream();
    match state.orchestrator.submit(&challenge, &user, upload).await {
        Ok(outcome) => grade_response(outcome, has_hooks),
        Err(err) => grade_error_response(err),
    }
}

/// With a hook configured the parsed object goes back as JSON; without
/// one the caller gets the raw text body.
fn grade_response(outcome: GradeOutcome, has_hooks: bool) -> Response {
    if has_hooks {
        Json(SubmitResponse {
            body: outcome.report.body,
            passed: outcome.report.passed,
            failed: outcome.report.failed,
            score: outcome.score,
            timed_out: outcome.timed_out,
        })
        .into_response()
    } else {
        outcome.report.body.into_response()
    }
}

/// The three visible failure shapes: a distinct 400 for oversized
/// uploads so the client can tell resubmission is pointless, a generic
/// 400 for undecodable archives, and a generic 500 for everything the
/// client cannot fix. Internal detail goes to the log, never the client.
fn grade_error_response(err: GradeError) -> Response {
    match err {
        GradeError::SizeExceeded { .. } => {
            (StatusCode::BAD_REQUEST, SIZE_EXCEEDED_MESSAGE).into_response()
        }
        GradeError::MalformedArchive(_) => {
            (StatusCode::BAD_REQUEST, "Malformed upload").into_response()
        }
        other => {
            error!("grading failed: {:#}", anyhow::Error::new(other));
            internal_error()
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    challenges: UserHistory,
}

async fn status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(user) = identity(&state, &headers).await else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let mut history = match state.store.load(&user.id).await {
        Ok(history) => history,
        Err(e) => {
            error!("failed to load history for {}: {:#}", user.id, e);
            return internal_error();
        }
    };

    // Every known challenge appears, submitted or not.
    match state.registry.list() {
        Ok(names) => {
            for name in names {
                history.entry(name).or_default();
            }
        }
        Err(e) => {
            error!("failed to list challenges: {:#}", e);
            return internal_error();
        }
    }

    Json(StatusResponse {
        challenges: history,
    })
    .into_response()
}

fn session_value(state: &AppState, headers: &HeaderMap) -> Option<String> {
    let cookie_header = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok());
    session_value_from_cookies(&state.cookie_name, cookie_header)
}

async fn identity(state: &AppState, headers: &HeaderMap) -> Option<UserIdentity> {
    let value = session_value(state, headers)?;
    state.sessions.resolve(&value).await.ok().flatten()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}
