//! Collecting the alerts that are active right now.

use std::cmp::Reverse;

use chrono::{DateTime, Duration, Utc};
use jade_core::{
  alert::Alert,
  call::CallStatus,
  scoring::Urgency,
  store::{CallQuery, FollowupStore},
};

use crate::{DispatchGate, Result, sync_status};

/// Upper bound on the rows one scan reads.
pub(crate) const SCAN_LIMIT: usize = 10_000;

/// What [`active_alerts`] needs to know about the deployment.
#[derive(Debug, Clone, Copy)]
pub struct AlertContext {
  pub urgency_threshold: Urgency,
  pub max_attempts:      u32,
  pub staleness:         Duration,
}

/// Every alert whose trigger currently holds, most severe first and newest
/// first within a severity.
pub async fn active_alerts<S: FollowupStore>(
  store: &S,
  gate: &DispatchGate,
  ctx: AlertContext,
  now: DateTime<Utc>,
) -> Result<Vec<Alert>> {
  let urgent = store
    .list_calls(CallQuery {
      status: Some(CallStatus::Called),
      min_urgency: Some(ctx.urgency_threshold),
      limit: Some(SCAN_LIMIT),
      ..Default::default()
    })
    .await
    .map_err(crate::Error::store)?;
  let exhausted = store
    .list_calls(CallQuery {
      status: Some(CallStatus::Failed),
      min_attempts: Some(ctx.max_attempts),
      limit: Some(SCAN_LIMIT),
      ..Default::default()
    })
    .await
    .map_err(crate::Error::store)?;

  let mut alerts: Vec<Alert> = urgent
    .iter()
    .chain(&exhausted)
    .flat_map(|call| Alert::for_call(call, ctx.urgency_threshold, ctx.max_attempts))
    .collect();

  for status in sync_status(store, now, ctx.staleness).await? {
    alerts.extend(Alert::stale_sync(status.table, status.freshness, now));
  }
  alerts.extend(gate.alert());

  alerts.sort_by_key(|a| (Reverse(a.severity), Reverse(a.raised_at)));
  Ok(alerts)
}
