use crate::error::ApiError;
use crate::{AppState, CurrentUser};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::http::header::SET_COOKIE;
use axum::response::IntoResponse;
use prepme_core::auth::{
    AuthResult, SignInParams, SignUpParams, clear_session_cookie, session_cookie,
};
use prepme_core::feedback::{CreateFeedbackRequest, CreateFeedbackResult, FeedbackService};
use prepme_core::models::{Feedback, Interview, TranscriptMessage, User};
use prepme_core::repository::{GetFeedbackParams, GetLatestInterviewsParams};
use serde::Deserialize;

pub async fn sign_up(
    State(state): State<AppState>,
    Json(params): Json<SignUpParams>,
) -> Json<AuthResult> {
    Json(state.auth.sign_up(params).await)
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(params): Json<SignInParams>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.auth.sign_in(params).await;
    let mut headers = HeaderMap::new();
    if let Some(token) = &outcome.session_token {
        let cookie = session_cookie(token, state.secure_cookies);
        headers.insert(
            SET_COOKIE,
            cookie.parse().map_err(|e| anyhow::anyhow!("bad cookie: {e}"))?,
        );
    }
    Ok((headers, Json(outcome.result)))
}

pub async fn sign_out(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(user_id = %user.id, "user signed out");
    let cookie = clear_session_cookie(state.secure_cookies);
    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        cookie.parse().map_err(|e| anyhow::anyhow!("bad cookie: {e}"))?,
    );
    Ok((headers, Json(state.auth.sign_out())))
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

pub async fn user_interviews(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Json<Option<Vec<Interview>>> {
    Json(state.repository.get_interviews_by_user_id(&user.id).await)
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub limit: Option<usize>,
}

pub async fn latest_interviews(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<LatestQuery>,
) -> Json<Option<Vec<Interview>>> {
    let params = GetLatestInterviewsParams {
        user_id: user.id,
        limit: query.limit,
    };
    Json(state.repository.get_latest_interviews(&params).await)
}

pub async fn interview(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Interview>, ApiError> {
    state
        .repository
        .get_interview_by_id(&id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Interview"))
}

pub async fn interview_feedback(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Option<Feedback>>, ApiError> {
    let params = GetFeedbackParams {
        interview_id: id,
        user_id: user.id,
    };
    Ok(Json(
        state.repository.get_feedback_by_interview_id(&params).await?,
    ))
}

/// Feedback is always attributed to the signed-in user.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFeedbackBody {
    pub interview_id: String,
    pub transcript: Vec<TranscriptMessage>,
    #[serde(default)]
    pub feedback_id: Option<String>,
}

pub async fn create_feedback(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateFeedbackBody>,
) -> Json<CreateFeedbackResult> {
    let request = CreateFeedbackRequest {
        interview_id: body.interview_id,
        user_id: user.id,
        transcript: body.transcript,
        feedback_id: body.feedback_id,
    };
    Json(state.feedback.create_feedback(request).await)
}
