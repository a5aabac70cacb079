//! Mirrors the hospital system's patients and admissions into the store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jade_core::{
  store::FollowupStore,
  sync::{HospitalSource, MirrorTable, SyncRun, SyncState, SyncStatus, freshness},
};
use strum::IntoEnumIterator as _;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::{Error, Result};

pub struct Reconciler<S, H> {
  store:  Arc<S>,
  source: Arc<H>,
}

impl<S, H> Reconciler<S, H>
where
  S: FollowupStore,
  H: HospitalSource,
{
  pub fn new(store: Arc<S>, source: Arc<H>) -> Self { Self { store, source } }

  /// Run one cycle over every mirrored table. A source failure is recorded
  /// against its table and does not stop the other tables; only a store
  /// failure is returned as an error.
  pub async fn cycle(&self) -> Result<Vec<SyncState>> {
    let mut states = Vec::new();
    for table in MirrorTable::iter() {
      states.push(self.sync_table(table).await?);
    }
    Ok(states)
  }

  async fn sync_table(&self, table: MirrorTable) -> Result<SyncState> {
    let run = SyncRun::start();
    let replaced = match table {
      MirrorTable::Patients => match self.source.patients().await {
        Ok(rows) => self.store.replace_patients(rows, run).await,
        Err(e) => return self.record_failure(table, run, e.to_string()).await,
      },
      MirrorTable::Admissions => match self.source.admissions().await {
        Ok(rows) => self.store.replace_admissions(rows, run).await,
        Err(e) => return self.record_failure(table, run, e.to_string()).await,
      },
    };

    match replaced {
      Ok(state) => {
        info!(
          %table,
          rows = state.last_row_count.unwrap_or_default(),
          duration_ms = state.last_duration_ms.unwrap_or_default(),
          "mirror refreshed"
        );
        Ok(state)
      }
      Err(e) => {
        error!(%table, error = %e, "could not replace mirror");
        self.record_failure(table, run, e.to_string()).await
      }
    }
  }

  async fn record_failure(
    &self,
    table: MirrorTable,
    run: SyncRun,
    message: String,
  ) -> Result<SyncState> {
    warn!(%table, error = %message, "sync failed; keeping previous snapshot");
    self
      .store
      .record_sync_failure(table, run, message)
      .await
      .map_err(Error::store)
  }
}

/// Freshness of every mirrored table, including those never synced.
pub async fn sync_status<S: FollowupStore>(
  store: &S,
  now: DateTime<Utc>,
  staleness: Duration,
) -> Result<Vec<SyncStatus>> {
  let states = store.sync_states().await.map_err(Error::store)?;
  Ok(
    MirrorTable::iter()
      .map(|table| {
        let state = states.iter().find(|s| s.table == table).cloned();
        let last_success = state.as_ref().and_then(|s| s.last_sync_at);
        SyncStatus { table, freshness: freshness(last_success, now, staleness), state }
      })
      .collect(),
  )
}

// ─── On-demand cycles ────────────────────────────────────────────────────────

pub(crate) type SyncReply = oneshot::Sender<Result<Vec<SyncState>, String>>;

/// Requests a cycle from the running reconciler worker and waits for it.
#[derive(Clone)]
pub struct SyncHandle {
  tx: mpsc::Sender<SyncReply>,
}

impl SyncHandle {
  pub(crate) fn channel() -> (Self, mpsc::Receiver<SyncReply>) {
    let (tx, rx) = mpsc::channel(4);
    (Self { tx }, rx)
  }

  /// Run a cycle now. Requests made while a cycle is running are served by
  /// the next one.
  pub async fn sync_now(&self) -> Result<Vec<SyncState>> {
    let (reply, result) = oneshot::channel();
    self
      .tx
      .send(reply)
      .await
      .map_err(|_| Error::Unavailable("reconciler"))?;
    result
      .await
      .map_err(|_| Error::Unavailable("reconciler"))?
      .map_err(|message| Error::Store(message.into()))
  }
}
