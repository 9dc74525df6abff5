use std::sync::Arc;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Reference counted error so that every waiter of a thunk can observe the same failure
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum Error {
  /// The scope was cancelled before an outcome was available, or the batcher was closed
  #[error("operation cancelled")]
  Cancelled,

  /// The concurrency control could not issue a token for the batch
  #[error("concurrency control rejected batch: {0}")]
  Limiter(SharedError),

  /// Per-request failure reported by the bulk action
  #[error("bulk action failed: {0}")]
  Action(SharedError),

  /// The bulk action returned fewer responses than it was given requests
  #[error("bulk action returned no response for request at index {index}")]
  MissingResponse { index: usize },

  #[error("bulk action panicked")]
  ActionPanicked,
}

impl Error {
  pub fn action<E>(err: E) -> Self
  where
    E: Into<BoxError>,
  {
    Error::Action(Arc::from(err.into()))
  }

  pub fn limiter<E>(err: E) -> Self
  where
    E: Into<BoxError>,
  {
    Error::Limiter(Arc::from(err.into()))
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Error::Cancelled)
  }
}

#[cfg(test)]
mod test {
  use super::Error;

  #[test]
  fn it_formats_wrapped_errors() {
    let err = Error::action("no such key");
    assert_eq!(err.to_string(), "bulk action failed: no such key");

    let err = Error::limiter(String::from("pool exhausted"));
    assert_eq!(
      err.to_string(),
      "concurrency control rejected batch: pool exhausted"
    );
  }

  #[test]
  fn it_shares_sources_across_clones() {
    let err = Error::action("boom");
    let cloned = err.clone();

    match (err, cloned) {
      (Error::Action(a), Error::Action(b)) => assert!(std::sync::Arc::ptr_eq(&a, &b)),
      _ => panic!("expected action errors"),
    }
  }
}
