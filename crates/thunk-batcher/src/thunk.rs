use std::{fmt, fmt::Debug, sync::Arc};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Outcome<V> {
  Pending,
  Fulfilled(V),
  Rejected(Error),
}

impl<V> Outcome<V> {
  fn is_resolved(&self) -> bool {
    !matches!(self, Outcome::Pending)
  }
}

/// A shared, re-resolvable future value. Every handle observes the same outcome, and each
/// resolution replaces the previous one (last write wins)
pub struct Thunk<V> {
  outcome: Arc<watch::Sender<Outcome<V>>>,
}

impl<V> Clone for Thunk<V> {
  fn clone(&self) -> Self {
    Thunk {
      outcome: self.outcome.clone(),
    }
  }
}

impl<V> Default for Thunk<V> {
  fn default() -> Self {
    Thunk::new()
  }
}

impl<V> Thunk<V> {
  pub fn new() -> Self {
    let (tx, _) = watch::channel(Outcome::Pending);

    Thunk {
      outcome: Arc::new(tx),
    }
  }

  pub(crate) fn resolve(&self, result: Result<V>) {
    let outcome = match result {
      Ok(value) => Outcome::Fulfilled(value),
      Err(err) => Outcome::Rejected(err),
    };

    self.outcome.send_replace(outcome);
  }

  pub fn is_pending(&self) -> bool {
    matches!(*self.outcome.borrow(), Outcome::Pending)
  }

  pub fn is_fulfilled(&self) -> bool {
    matches!(*self.outcome.borrow(), Outcome::Fulfilled(_))
  }

  pub fn is_rejected(&self) -> bool {
    matches!(*self.outcome.borrow(), Outcome::Rejected(_))
  }
}

impl<V> Thunk<V>
where
  V: Clone,
{
  /// Wait until resolved or until `scope` is cancelled. Resolution takes precedence when both
  /// are ready
  pub async fn wait(&self, scope: &CancellationToken) -> Result<V> {
    let mut rx = self.outcome.subscribe();

    tokio::select! {
      biased;

      outcome = rx.wait_for(Outcome::is_resolved) => match outcome {
        Ok(outcome) => match &*outcome {
          Outcome::Fulfilled(value) => Ok(value.clone()),
          Outcome::Rejected(err) => Err(err.clone()),
          Outcome::Pending => Err(Error::Cancelled),
        },
        // The sender lives as long as this handle
        Err(_) => Err(Error::Cancelled),
      },
      _ = scope.cancelled() => Err(Error::Cancelled),
    }
  }

  /// Replace the outcome with `value` and then wait as with [`Thunk::wait`]
  pub async fn set(&self, scope: &CancellationToken, value: V) -> Result<V> {
    self.resolve(Ok(value));
    self.wait(scope).await
  }

  /// Replace the outcome with `err` and then wait as with [`Thunk::wait`]
  pub async fn error(&self, scope: &CancellationToken, err: Error) -> Result<V> {
    self.resolve(Err(err));
    self.wait(scope).await
  }
}

impl<V> Debug for Thunk<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match *self.outcome.borrow() {
      Outcome::Pending => "pending",
      Outcome::Fulfilled(_) => "fulfilled",
      Outcome::Rejected(_) => "rejected",
    };

    f.debug_struct("Thunk").field("state", &state).finish()
  }
}
