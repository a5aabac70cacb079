//! Error types for `jade-engine`.

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(BoxError),

  #[error("hospital source error: {0}")]
  Source(BoxError),

  #[error("core error: {0}")]
  Core(#[from] jade_core::Error),

  /// The worker serving a request has shut down.
  #[error("{0} is not running")]
  Unavailable(&'static str),
}

impl Error {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  pub fn source(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Source(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
