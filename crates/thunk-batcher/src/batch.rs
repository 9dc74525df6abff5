use std::time::Instant;

use tokio_util::{sync::CancellationToken, task::task_tracker::TaskTrackerToken};

use crate::thunk::Thunk;

/// A one-shot broadcast signal. Firing is idempotent and every clone observes it
#[derive(Debug, Clone, Default)]
pub struct Signal(CancellationToken);

impl Signal {
  pub fn new() -> Self {
    Signal::default()
  }

  pub fn fire(&self) {
    self.0.cancel();
  }

  pub fn is_fired(&self) -> bool {
    self.0.is_cancelled()
  }

  /// Resolves once fired, immediately if already fired
  pub async fn fired(&self) {
    self.0.cancelled().await
  }
}

/// The lifecycle signals a [`Scheduler`](crate::Scheduler) races to decide when a batch dispatches
#[derive(Debug, Clone)]
pub struct BatchSignals {
  full: Signal,
  dispatch: Signal,
  created_at: Instant,
}

impl Default for BatchSignals {
  fn default() -> Self {
    BatchSignals::new()
  }
}

impl BatchSignals {
  pub fn new() -> Self {
    BatchSignals {
      full: Signal::new(),
      dispatch: Signal::new(),
      created_at: Instant::now(),
    }
  }

  /// Fired when the batch reaches its maximum size
  pub fn full(&self) -> &Signal {
    &self.full
  }

  /// Fired when a flush is requested
  pub fn dispatch(&self) -> &Signal {
    &self.dispatch
  }

  pub fn created_at(&self) -> Instant {
    self.created_at
  }
}

pub(crate) struct Batch<Req, Res> {
  pub(crate) id: u64,
  pub(crate) requests: Vec<Req>,
  pub(crate) thunks: Vec<Thunk<Res>>,
  pub(crate) signals: BatchSignals,
  // Held until every thunk is resolved; shutdown waits on these
  pub(crate) in_flight: TaskTrackerToken,
}

impl<Req, Res> Batch<Req, Res> {
  pub(crate) fn new(id: u64, capacity: usize, in_flight: TaskTrackerToken) -> Self {
    Batch {
      id,
      requests: Vec::with_capacity(capacity),
      thunks: Vec::with_capacity(capacity),
      signals: BatchSignals::new(),
      in_flight,
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.requests.len()
  }

  pub(crate) fn push(&mut self, request: Req, thunk: Thunk<Res>) {
    self.requests.push(request);
    self.thunks.push(thunk);
  }

  /// Full batches are closed to new requests. A capacity of zero makes every batch full
  pub(crate) fn is_full(&self, max_batch_size: usize) -> bool {
    self.len() >= max_batch_size
  }

  /// Request a flush unless a dispatch trigger already fired
  pub(crate) fn request_dispatch(&self) -> bool {
    if self.signals.full.is_fired() || self.signals.dispatch.is_fired() {
      false
    } else {
      self.signals.dispatch.fire();
      true
    }
  }
}

#[cfg(test)]
mod test {
  use std::time::Duration;

  use tokio_util::task::TaskTracker;

  use super::{Batch, Signal};
  use crate::Thunk;

  #[tokio::test]
  async fn it_fires_once_for_every_clone() {
    let signal = Signal::new();
    let observer = signal.clone();

    assert!(!observer.is_fired());

    signal.fire();
    signal.fire();

    assert!(observer.is_fired());
    tokio::time::timeout(Duration::from_millis(10), observer.fired())
      .await
      .unwrap();
  }

  #[test]
  fn it_counts_empty_batches_as_full_at_zero_capacity() {
    let tracker = TaskTracker::new();
    let batch: Batch<u64, u64> = Batch::new(0, 0, tracker.token());

    assert!(batch.is_full(0));
    assert!(!batch.is_full(1));
  }

  #[test]
  fn it_requests_dispatch_only_when_untriggered() {
    let tracker = TaskTracker::new();
    let mut batch: Batch<u64, u64> = Batch::new(0, 2, tracker.token());

    batch.push(1, Thunk::new());
    assert!(batch.request_dispatch());
    assert!(!batch.request_dispatch());

    let full: Batch<u64, u64> = Batch::new(1, 1, tracker.token());
    full.signals.full().fire();
    assert!(!full.request_dispatch());
    assert!(!full.signals.dispatch().is_fired());
  }
}
