//! Handlers for operational endpoints: statistics, alerts, sync and
//! dispatch control.

use axum::{Json, extract::State};
use chrono::Utc;
use jade_core::{
  alert::Alert,
  store::{CallStats, FollowupStore},
  sync::{SyncState, SyncStatus},
};
use jade_engine::{Suspension, alerts::active_alerts};
use serde::Serialize;
use serde_json::{Value, json};

use crate::{AppState, error::ApiError};

/// `GET /stats`
pub async fn stats<S: FollowupStore>(
  State(state): State<AppState<S>>,
) -> Result<Json<CallStats>, ApiError> {
  let stats = state
    .store
    .call_stats(Utc::now(), state.alerts.max_attempts)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(stats))
}

/// `GET /alerts`
pub async fn alerts<S: FollowupStore>(
  State(state): State<AppState<S>>,
) -> Result<Json<Vec<Alert>>, ApiError> {
  let alerts =
    active_alerts(&*state.store, &state.controls.gate, state.alerts, Utc::now()).await?;
  Ok(Json(alerts))
}

/// `GET /sync`
pub async fn sync_status<S: FollowupStore>(
  State(state): State<AppState<S>>,
) -> Result<Json<Vec<SyncStatus>>, ApiError> {
  let status =
    jade_engine::sync_status(&*state.store, Utc::now(), state.alerts.staleness).await?;
  Ok(Json(status))
}

/// `POST /sync`; blocks until the cycle has been recorded.
pub async fn sync_now<S: FollowupStore>(
  State(state): State<AppState<S>>,
) -> Result<Json<Vec<SyncState>>, ApiError> {
  Ok(Json(state.controls.sync.sync_now().await?))
}

#[derive(Debug, Serialize)]
pub struct DispatchStatus {
  pub open:       bool,
  pub suspension: Option<Suspension>,
}

/// `GET /dispatch`
pub async fn dispatch_status<S: FollowupStore>(
  State(state): State<AppState<S>>,
) -> Json<DispatchStatus> {
  let suspension = state.controls.gate.suspension();
  Json(DispatchStatus { open: suspension.is_none(), suspension })
}

/// `POST /dispatch/resume`
pub async fn resume<S: FollowupStore>(State(state): State<AppState<S>>) -> Json<Value> {
  let resumed = state.controls.gate.resume();
  Json(json!({ "resumed": resumed }))
}
