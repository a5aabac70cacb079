//! Error types for `jade-ami`.

use thiserror::Error;

/// The step of a session that was waiting when a timeout fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
  Connect,
  Login,
  Originate,
  Answer,
  Teardown,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("timed out during {0}")]
  Timeout(Stage),

  #[error("manager rejected login: {0}")]
  Authentication(String),

  #[error("manager rejected originate: {0}")]
  OriginateRejected(String),

  #[error("call failed: {0}")]
  CallFailed(String),

  #[error("patient hung up")]
  HungUp,

  #[error("manager closed the connection")]
  ConnectionClosed,

  #[error("malformed block: {0}")]
  MalformedBlock(String),

  #[error("no call leg has been originated on this session")]
  NoLeg,
}

impl Error {
  /// Credentials were refused. Retrying with the same credentials is
  /// pointless.
  pub fn is_authentication(&self) -> bool {
    matches!(self, Self::Authentication(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
