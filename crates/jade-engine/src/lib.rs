//! The follow-up engine's background workers.
//!
//! - [`Scheduler`] turns mirrored admissions into `pending` calls.
//! - [`Dispatcher`] claims due calls, dials them through a [`Dialer`], and
//!   commits the outcome (including retries) to the store.
//! - [`Reconciler`] refreshes the patient and admission mirrors from the
//!   hospital system.
//!
//! Operators reach the running workers through [`Controls`]: an on-demand
//! sync, aborting an in-flight call, and resuming a suspended dispatcher.

mod abort;
pub mod alerts;
mod dialer;
mod dispatch;
pub mod error;
mod gate;
mod policy;
mod reconcile;
mod scheduler;
mod worker;

pub use abort::{AbortRegistry, AbortSignal};
pub use dialer::{AmiDialer, DialError, DialOutcome, Dialer};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use gate::{DispatchGate, Suspension};
pub use policy::{AlertSettings, Policy, SyncSettings};
pub use reconcile::{Reconciler, SyncHandle, sync_status};
pub use scheduler::Scheduler;
pub use worker::{Controls, Engine};
