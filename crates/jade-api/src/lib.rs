//! JSON query API for the Jade follow-up engine.
//!
//! Exposes an axum [`Router`] backed by any
//! [`jade_core::store::FollowupStore`] and the [`jade_engine::Controls`] of a
//! running engine. Everything is read-only except the three operator
//! controls. Auth, TLS, and transport concerns are the caller's
//! responsibility.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/calls` | Filters and paging, see [`calls::list`] |
//! | `GET`  | `/calls/{id}` | 404 if not found |
//! | `GET`  | `/calls/{id}/score` | Score breakdown; 404 until scored |
//! | `GET`  | `/calls/{id}/history` | Audit trail, oldest first |
//! | `POST` | `/calls/{id}/abort` | 409 unless an attempt is in flight |
//! | `GET`  | `/stats` | Aggregates |
//! | `GET`  | `/alerts` | Active alerts, most severe first |
//! | `GET`  | `/sync` | Freshness per mirrored table |
//! | `POST` | `/sync` | Run a sync cycle and wait for it |
//! | `GET`  | `/dispatch` | Whether dispatch is suspended |
//! | `POST` | `/dispatch/resume` | Lift an authentication suspension |

pub mod calls;
pub mod error;
pub mod ops;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use jade_core::store::FollowupStore;
use jade_engine::{Controls, alerts::AlertContext};

pub use error::ApiError;

/// Shared state threaded through all handlers.
pub struct AppState<S> {
  pub store:    Arc<S>,
  pub controls: Controls,
  /// Thresholds used for alerts, stats and freshness.
  pub alerts:   AlertContext,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self { store: self.store.clone(), controls: self.controls.clone(), alerts: self.alerts }
  }
}

/// Build the API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: FollowupStore + 'static,
{
  Router::new()
    // Calls
    .route("/calls", get(calls::list::<S>))
    .route("/calls/{id}", get(calls::get_one::<S>))
    .route("/calls/{id}/score", get(calls::score::<S>))
    .route("/calls/{id}/history", get(calls::history::<S>))
    .route("/calls/{id}/abort", post(calls::abort::<S>))
    // Operations
    .route("/stats", get(ops::stats::<S>))
    .route("/alerts", get(ops::alerts::<S>))
    .route("/sync", get(ops::sync_status::<S>).post(ops::sync_now::<S>))
    .route("/dispatch", get(ops::dispatch_status::<S>))
    .route("/dispatch/resume", post(ops::resume::<S>))
    .with_state(state)
}
