//! Error types for `jade-core`.

use thiserror::Error;

use crate::call::CallStatus;

#[derive(Debug, Error)]
pub enum Error {
  #[error("illegal call transition: {from:?} -> {to}")]
  InvalidTransition {
    from: Option<CallStatus>,
    to:   CallStatus,
  },

  #[error("unknown call status: {0:?}")]
  UnknownStatus(String),

  #[error("unknown urgency: {0:?}")]
  UnknownUrgency(String),

  #[error("unknown mirrored table: {0:?}")]
  UnknownTable(String),

  #[error("invalid score weights: {0}")]
  InvalidWeights(String),

  #[error("invalid dialogue script: {0}")]
  InvalidScript(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
