//! Error type for `jade-store-sqlite`.

use jade_core::call::CallStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] jade_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("call not found: {0}")]
  CallNotFound(uuid::Uuid),

  /// A conditional update matched no row because the call had moved on.
  #[error("call {call_id} is {found}, expected {expected}")]
  Conflict {
    call_id:  uuid::Uuid,
    expected: CallStatus,
    found:    CallStatus,
  },

  #[error("refusing to complete call {0} with an incomplete dialogue")]
  IncompleteCapture(uuid::Uuid),

  /// A row in the hospital export could not be mapped.
  #[error("malformed source row in {table}: {message}")]
  MalformedSource { table: &'static str, message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
