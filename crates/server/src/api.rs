//! HTTP surface of the practice assistant.
//!
//! - `POST /chat`: one utterance in, one reply out
//! - `POST /sessions/{session_id}/logout`: end a session, abandoning any booking
//! - `GET  /users/{user_id}/sessions`: stored sessions, most recent first
//! - `GET  /users/{user_id}/sessions/{session_id}/history`: turns of one stored session
//! - `PUT  /users/{user_id}/profile`: save intake details before booking
//! - `GET  /users/{user_id}/profile`: the saved intake details
//! - `POST /feedback`: free-text feedback
//! - `GET  /slots?date=YYYY-MM-DD`: free appointment slots for a day

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use medidesk_agent::ConversationRouter;
use medidesk_core::domain::conversation::{
    ChatTurn, ResponseRoute, SessionId, SessionSummary, UserId, Utterance,
};
use medidesk_core::domain::feedback::Feedback;
use medidesk_core::domain::profile::PatientProfile;
use medidesk_core::domain::schedule::Slot;
use medidesk_core::errors::{ApplicationError, InterfaceError};
use medidesk_db::{
    ChatHistoryRepository, FeedbackRepository, PatientProfileRepository, RepositoryError,
};

use crate::effects::SideEffectExecutor;
use crate::sessions::{SessionError, SessionRegistry};

#[derive(Clone)]
pub struct ApiState {
    pub router: Arc<ConversationRouter>,
    pub sessions: Arc<SessionRegistry>,
    pub executor: Arc<SideEffectExecutor>,
    pub history: Arc<dyn ChatHistoryRepository>,
    pub feedback: Arc<dyn FeedbackRepository>,
    pub profiles: Arc<dyn PatientProfileRepository>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub session_id: SessionId,
    pub reply: String,
    pub route: ResponseRoute,
    pub booking_phase: &'static str,
    pub correlation_id: String,
    pub error: Option<ReplyError>,
}

/// A recoverable failure already folded into `reply`.
#[derive(Debug, Serialize)]
pub struct ReplyError {
    pub class: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LogoutReply {
    pub session_id: SessionId,
    pub ended: bool,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub user_id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct FeedbackReceipt {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    pub full_name: String,
    pub birth_date: String,
    pub reason_for_appointment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: String,
}

#[derive(Debug, Serialize)]
pub struct SlotsReply {
    pub date: NaiveDate,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub message: &'static str,
    pub correlation_id: String,
}

type ApiFailure = (StatusCode, Json<ApiError>);

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/sessions/{session_id}/logout", post(logout))
        .route("/users/{user_id}/sessions", get(list_sessions))
        .route("/users/{user_id}/sessions/{session_id}/history", get(session_history))
        .route("/users/{user_id}/profile", put(save_profile).get(load_profile))
        .route("/feedback", post(submit_feedback))
        .route("/slots", get(available_slots))
        .with_state(state)
}

async fn chat(
    State(state): State<ApiState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiFailure> {
    let user_id = body.user_id.trim();
    let message = body.message.trim();
    if user_id.is_empty() || message.is_empty() {
        return Err(bad_request("user_id and message are required"));
    }
    let user_id = UserId(user_id.to_string());
    let requested = body.session_id.filter(|id| !id.trim().is_empty()).map(SessionId);

    let (session_id, handle) =
        state.sessions.open(requested, &user_id).await.map_err(session_failure)?;

    let mut session = handle.lock().await;
    let response = state.router.handle(&Utterance::new(user_id, message), &mut session).await;
    let booking_phase = session.booking.phase().as_str();
    state.executor.apply(&response.side_effects, &response.correlation_id).await;
    drop(session);

    let error = response.error.map(|error| ReplyError {
        class: error.class(),
        message: error.into_interface(response.correlation_id.clone()).user_message(),
    });

    Ok(Json(ChatReply {
        session_id,
        reply: response.response_text,
        route: response.route,
        booking_phase,
        correlation_id: response.correlation_id,
        error,
    }))
}

async fn logout(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
) -> Json<LogoutReply> {
    let session_id = SessionId(session_id);
    let ended = state.sessions.logout(&session_id).await;
    Json(LogoutReply { session_id, ended })
}

async fn list_sessions(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<Vec<SessionSummary>>, ApiFailure> {
    let sessions =
        state.history.list_sessions(&UserId(user_id)).await.map_err(repository_failure)?;
    Ok(Json(sessions))
}

async fn session_history(
    Path((user_id, session_id)): Path<(String, String)>,
    State(state): State<ApiState>,
) -> Result<Json<Vec<ChatTurn>>, ApiFailure> {
    let turns = state
        .history
        .history(&UserId(user_id), &SessionId(session_id))
        .await
        .map_err(repository_failure)?;
    Ok(Json(turns))
}

async fn submit_feedback(
    State(state): State<ApiState>,
    Json(body): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackReceipt>), ApiFailure> {
    let feedback = Feedback::new(UserId(body.user_id.trim().to_string()), &body.text)
        .map_err(|error| application_failure(ApplicationError::Validation(error)))?;

    state.feedback.submit_feedback(&feedback).await.map_err(repository_failure)?;
    info!(
        event_name = "feedback.received",
        user_id = %feedback.user_id,
        length = feedback.text.len(),
        "feedback received"
    );

    Ok((StatusCode::CREATED, Json(FeedbackReceipt { status: "received" })))
}

async fn save_profile(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
    Json(body): Json<ProfileRequest>,
) -> Result<Json<PatientProfile>, ApiFailure> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(bad_request("user_id is required"));
    }
    let birth_date = NaiveDate::parse_from_str(body.birth_date.trim(), "%Y-%m-%d")
        .map_err(|_| bad_request("birth_date must be formatted YYYY-MM-DD"))?;
    let profile = PatientProfile::new(
        UserId(user_id.to_string()),
        &body.full_name,
        birth_date,
        body.reason_for_appointment.as_deref(),
        Utc::now().date_naive(),
    )
    .map_err(|error| application_failure(ApplicationError::Validation(error)))?;

    state.profiles.upsert_profile(&profile).await.map_err(repository_failure)?;
    info!(
        event_name = "profile.saved",
        user_id = %profile.user_id,
        has_reason = profile.reason_for_appointment.is_some(),
        "patient profile saved"
    );

    Ok(Json(profile))
}

async fn load_profile(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<PatientProfile>, ApiFailure> {
    let user_id = UserId(user_id);
    match state.profiles.find_profile(&user_id).await.map_err(repository_failure)? {
        Some(profile) => Ok(Json(profile)),
        None => Err(not_found(format!("no profile saved for {user_id}"))),
    }
}

async fn available_slots(
    Query(query): Query<SlotsQuery>,
    State(state): State<ApiState>,
) -> Result<Json<SlotsReply>, ApiFailure> {
    let date = NaiveDate::parse_from_str(query.date.trim(), "%Y-%m-%d")
        .map_err(|_| bad_request("date must be formatted YYYY-MM-DD"))?;
    let today = Utc::now().date_naive();

    let existing = if date < today {
        BTreeSet::new()
    } else {
        let store = state.router.appointments();
        store.list_appointments(date).await.map_err(application_failure)?
    };
    let slots = state
        .router
        .allocator()
        .available_slots_from(date, today, &existing)
        .map_err(|error| application_failure(ApplicationError::Validation(error)))?;

    Ok(Json(SlotsReply { date, slots }))
}

fn failure(error: InterfaceError) -> ApiFailure {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ApiError {
        error: error.to_string(),
        message: error.user_message(),
        correlation_id: error.correlation_id().to_string(),
    };
    (status, Json(body))
}

fn application_failure(error: ApplicationError) -> ApiFailure {
    failure(error.into_interface(Uuid::new_v4().to_string()))
}

fn repository_failure(error: RepositoryError) -> ApiFailure {
    tracing::error!(
        event_name = "api.repository_failed",
        error = %error,
        "repository call failed"
    );
    application_failure(error.into())
}

fn bad_request(message: &str) -> ApiFailure {
    failure(InterfaceError::BadRequest {
        message: message.to_string(),
        correlation_id: Uuid::new_v4().to_string(),
    })
}

fn not_found(error: String) -> ApiFailure {
    let body = ApiError {
        error,
        message: "Nothing was found for this request.",
        correlation_id: Uuid::new_v4().to_string(),
    };
    (StatusCode::NOT_FOUND, Json(body))
}

fn session_failure(error: SessionError) -> ApiFailure {
    let body = ApiError {
        error: error.to_string(),
        message: "This conversation belongs to another user. Start a new session.",
        correlation_id: Uuid::new_v4().to_string(),
    };
    (StatusCode::FORBIDDEN, Json(body))
}
