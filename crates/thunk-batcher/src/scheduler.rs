use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::batch::BatchSignals;

pub const DEFAULT_TIME_WINDOW: Duration = Duration::from_secs(2);

/// Decides when a batch dispatches. Runs as its own task per batch and invokes the callback once
/// on whichever trigger fires first; if `scope` is cancelled first the callback is not invoked
#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
  async fn schedule(
    &self,
    scope: CancellationToken,
    batch: BatchSignals,
    callback: SchedulerCallback,
  );
}

/// Dispatch hook handed to a [`Scheduler`]. Invoking it more than once is harmless
#[derive(Clone)]
pub struct SchedulerCallback {
  callback: Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>,
}

impl SchedulerCallback {
  pub fn new<F>(callback: F) -> Self
  where
    F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
  {
    SchedulerCallback {
      callback: Arc::new(callback),
    }
  }

  pub async fn call(&self) {
    (self.callback)().await
  }
}

impl fmt::Debug for SchedulerCallback {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SchedulerCallback").finish_non_exhaustive()
  }
}

/// Dispatches when the batch fills, when a flush is requested, or once the time window since
/// scheduling elapses
#[derive(Debug, Clone, Copy)]
pub struct TimeWindowScheduler {
  time_window: Duration,
}

impl TimeWindowScheduler {
  pub fn new(time_window: Duration) -> Self {
    TimeWindowScheduler { time_window }
  }

  pub fn time_window(&self) -> Duration {
    self.time_window
  }
}

impl Default for TimeWindowScheduler {
  fn default() -> Self {
    TimeWindowScheduler::new(DEFAULT_TIME_WINDOW)
  }
}

#[async_trait]
impl Scheduler for TimeWindowScheduler {
  async fn schedule(
    &self,
    scope: CancellationToken,
    batch: BatchSignals,
    callback: SchedulerCallback,
  ) {
    // Dropped on every branch, cancelling the timer
    let timer = tokio::time::sleep(self.time_window);
    tokio::pin!(timer);

    tokio::select! {
      _ = scope.cancelled() => return,
      _ = batch.dispatch().fired() => {}
      _ = batch.full().fired() => {}
      _ = &mut timer => {}
    }

    callback.call().await;
  }
}

/// Dispatches immediately without a batching window
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantScheduler;

#[async_trait]
impl Scheduler for InstantScheduler {
  async fn schedule(
    &self,
    _scope: CancellationToken,
    _batch: BatchSignals,
    callback: SchedulerCallback,
  ) {
    callback.call().await;
  }
}
