use std::{fmt, sync::Arc, time::Duration};

use crate::{
  concurrency::{ConcurrencyControl, LimitedConcurrency, UnlimitedConcurrency},
  scheduler::{Scheduler, TimeWindowScheduler},
};

pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Construction options for a [`Batcher`](crate::Batcher)
#[derive(Clone)]
pub struct BatcherOptions {
  pub(crate) max_batch_size: usize,
  pub(crate) scheduler: Arc<dyn Scheduler>,
  pub(crate) concurrency_control: Arc<dyn ConcurrencyControl>,
}

impl Default for BatcherOptions {
  fn default() -> Self {
    BatcherOptions {
      max_batch_size: DEFAULT_MAX_BATCH_SIZE,
      scheduler: Arc::new(TimeWindowScheduler::default()),
      concurrency_control: Arc::new(UnlimitedConcurrency),
    }
  }
}

impl BatcherOptions {
  pub fn new() -> Self {
    BatcherOptions::default()
  }

  /// Maximum requests per batch. Zero disables batching: every request dispatches alone
  pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
    self.max_batch_size = max_batch_size;
    self
  }

  pub fn scheduler<S>(mut self, scheduler: S) -> Self
  where
    S: Scheduler,
  {
    self.scheduler = Arc::new(scheduler);
    self
  }

  /// Shorthand for a [`TimeWindowScheduler`] with the given window
  pub fn time_window(self, time_window: Duration) -> Self {
    self.scheduler(TimeWindowScheduler::new(time_window))
  }

  pub fn concurrency_control<C>(mut self, concurrency_control: C) -> Self
  where
    C: ConcurrencyControl,
  {
    self.concurrency_control = Arc::new(concurrency_control);
    self
  }

  /// Shorthand for a [`LimitedConcurrency`] with the default wait list depth
  pub fn concurrency_limit(self, limit: usize) -> Self {
    self.concurrency_control(LimitedConcurrency::new(limit))
  }

  pub fn get_max_batch_size(&self) -> usize {
    self.max_batch_size
  }
}

impl fmt::Debug for BatcherOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BatcherOptions")
      .field("max_batch_size", &self.max_batch_size)
      .finish_non_exhaustive()
  }
}
