//! Handlers for `/calls` endpoints.

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use jade_core::{
  call::{Call, CallHistoryEntry},
  scoring::Assessment,
  store::{CallQuery, FollowupStore},
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

/// Largest page `GET /calls` returns.
pub const MAX_PAGE: usize = 500;

async fn load<S: FollowupStore>(state: &AppState<S>, id: Uuid) -> Result<Call, ApiError> {
  state
    .store
    .get_call(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("call {id}")))
}

// ─── List ────────────────────────────────────────────────────────────────────

/// `GET /calls[?status=&min_urgency=&min_attempts=&patient_id=&admission_id=
/// &scheduled_after=&scheduled_before=&limit=&offset=]`
///
/// Most recently scheduled first; `limit` defaults to 100 and is capped at
/// [`MAX_PAGE`].
pub async fn list<S: FollowupStore>(
  State(state): State<AppState<S>>,
  Query(mut query): Query<CallQuery>,
) -> Result<Json<Vec<Call>>, ApiError> {
  let inverted = query
    .scheduled_after
    .zip(query.scheduled_before)
    .is_some_and(|(after, before)| after > before);
  if inverted {
    return Err(ApiError::BadRequest(
      "scheduled_after must not be later than scheduled_before".into(),
    ));
  }
  query.limit = Some(query.limit.unwrap_or(100).min(MAX_PAGE));

  let calls = state.store.list_calls(query).await.map_err(ApiError::store)?;
  Ok(Json(calls))
}

// ─── Single call ─────────────────────────────────────────────────────────────

/// `GET /calls/{id}`
pub async fn get_one<S: FollowupStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Call>, ApiError> {
  Ok(Json(load(&state, id).await?))
}

/// `GET /calls/{id}/score`: the assessment with its per-factor breakdown.
pub async fn score<S: FollowupStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Assessment>, ApiError> {
  let call = load(&state, id).await?;
  call
    .score
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("call {id} has not been scored")))
}

/// `GET /calls/{id}/history`
pub async fn history<S: FollowupStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<CallHistoryEntry>>, ApiError> {
  load(&state, id).await?;
  let entries = state.store.call_history(id).await.map_err(ApiError::store)?;
  Ok(Json(entries))
}

// ─── Abort ───────────────────────────────────────────────────────────────────

/// `POST /calls/{id}/abort`
///
/// Tears down the in-flight attempt; the call is then failed with reason
/// `aborted` and rescheduled if it has attempts left. Responds `202` because
/// that happens asynchronously.
pub async fn abort<S: FollowupStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
  if state.controls.aborts.abort(id) {
    info!(call_id = %id, "abort requested");
    return Ok((StatusCode::ACCEPTED, Json(json!({ "call_id": id, "aborting": true }))));
  }
  let call = load(&state, id).await?;
  Err(ApiError::Conflict(format!(
    "call {id} is {} and has no attempt in flight",
    call.status
  )))
}
