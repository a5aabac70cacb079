//! Spawning the workers and stopping them.

use std::sync::Arc;

use chrono::Utc;
use jade_core::{scoring::ScoringConfig, store::FollowupStore, sync::HospitalSource};
use tokio::{
  sync::{mpsc, watch},
  task::JoinHandle,
  time::{self, MissedTickBehavior},
};
use tracing::{error, info};

use crate::{
  AbortRegistry, Dialer, DispatchGate, Dispatcher, Policy, Reconciler, Result, Scheduler,
  SyncHandle, SyncSettings, reconcile::SyncReply,
};

/// Handles for steering a running engine.
#[derive(Clone)]
pub struct Controls {
  pub sync:   SyncHandle,
  pub aborts: AbortRegistry,
  pub gate:   DispatchGate,
}

/// The running workers.
pub struct Engine {
  controls: Controls,
  tasks:    Vec<JoinHandle<()>>,
}

impl Engine {
  /// Fail claims abandoned by an earlier run, then spawn the reconciler, the
  /// scheduler and `policy.dispatch_workers` dispatchers.
  /// Every worker exits once `shutdown` turns `true`; an attempt in flight
  /// runs to its end first.
  pub async fn start<S, H, D>(
    store: Arc<S>,
    source: Arc<H>,
    dialer: Arc<D>,
    policy: Policy,
    sync: SyncSettings,
    scoring: ScoringConfig,
    shutdown: watch::Receiver<bool>,
  ) -> Result<Self>
  where
    S: FollowupStore + 'static,
    H: HospitalSource + 'static,
    D: Dialer,
  {
    let policy = Arc::new(policy);
    let (sync_handle, sync_requests) = SyncHandle::channel();
    let controls = Controls {
      sync:   sync_handle,
      aborts: AbortRegistry::new(),
      gate:   DispatchGate::new(),
    };

    let dispatcher = Arc::new(Dispatcher::new(
      store.clone(),
      dialer,
      policy.clone(),
      Arc::new(scoring),
      controls.aborts.clone(),
      controls.gate.clone(),
    ));
    dispatcher.sweep_stale_claims().await?;

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(reconcile_loop(
      Reconciler::new(store.clone(), source),
      sync,
      sync_requests,
      shutdown.clone(),
    )));
    tasks.push(tokio::spawn(schedule_loop(
      Scheduler::new(store, policy.clone()),
      policy.clone(),
      shutdown.clone(),
    )));
    for worker in 0..policy.dispatch_workers {
      tasks.push(tokio::spawn(dispatch_loop(
        worker,
        dispatcher.clone(),
        policy.clone(),
        shutdown.clone(),
      )));
    }
    info!(dispatch_workers = policy.dispatch_workers, "engine started");

    Ok(Self { controls, tasks })
  }

  pub fn controls(&self) -> &Controls { &self.controls }

  /// Wait for every worker to exit.
  pub async fn join(self) {
    for task in self.tasks {
      if let Err(e) = task.await {
        error!(error = %e, "engine worker panicked");
      }
    }
    info!("engine stopped");
  }
}

fn stopping(shutdown: &watch::Receiver<bool>) -> bool { *shutdown.borrow() }

async fn reconcile_loop<S, H>(
  reconciler: Reconciler<S, H>,
  settings: SyncSettings,
  mut requests: mpsc::Receiver<SyncReply>,
  mut shutdown: watch::Receiver<bool>,
) where
  S: FollowupStore,
  H: HospitalSource,
{
  let mut interval = time::interval(settings.interval());
  interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

  while !stopping(&shutdown) {
    tokio::select! {
      _ = interval.tick() => {
        if let Err(e) = reconciler.cycle().await {
          error!(error = %e, "sync cycle failed");
        }
      }
      Some(reply) = requests.recv() => {
        let result = reconciler.cycle().await.map_err(|e| e.to_string());
        if let Err(e) = &result {
          error!(error = %e, "requested sync cycle failed");
        }
        // The requester may have given up; the cycle's outcome is persisted
        // either way.
        let _ = reply.send(result);
      }
      changed = shutdown.changed() => {
        // A dropped sender means nobody can stop us any more; stop now.
        if changed.is_err() {
          break;
        }
      }
    }
  }
}

async fn schedule_loop<S: FollowupStore>(
  scheduler: Scheduler<S>,
  policy: Arc<Policy>,
  mut shutdown: watch::Receiver<bool>,
) {
  let mut interval = time::interval(policy.scheduler_tick());
  interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

  while !stopping(&shutdown) {
    tokio::select! {
      _ = interval.tick() => {
        if let Err(e) = scheduler.tick(Utc::now().date_naive()).await {
          error!(error = %e, "scheduler tick failed");
        }
      }
      changed = shutdown.changed() => {
        // A dropped sender means nobody can stop us any more; stop now.
        if changed.is_err() {
          break;
        }
      }
    }
  }
}

async fn dispatch_loop<S, D>(
  worker: usize,
  dispatcher: Arc<Dispatcher<S, D>>,
  policy: Arc<Policy>,
  mut shutdown: watch::Receiver<bool>,
) where
  S: FollowupStore,
  D: Dialer,
{
  let mut interval = time::interval(policy.dispatch_poll());
  interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

  while !stopping(&shutdown) {
    tokio::select! {
      _ = interval.tick() => {
        if let Err(e) = dispatcher.dispatch_due().await {
          error!(worker, error = %e, "dispatch failed");
        }
      }
      changed = shutdown.changed() => {
        // A dropped sender means nobody can stop us any more; stop now.
        if changed.is_err() {
          break;
        }
      }
    }
  }
}
