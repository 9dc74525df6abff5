use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

// Producers on every worker thread bump these, so each is padded onto its own cache line
#[derive(Debug, Default)]
pub(crate) struct Counter(CachePadded<AtomicU64>);

impl Counter {
  #[inline(always)]
  pub(crate) fn incr(&self) {
    self.add(1);
  }

  #[inline(always)]
  pub(crate) fn add(&self, n: u64) {
    self.0.fetch_add(n, Ordering::Relaxed);
  }

  fn get(&self) -> u64 {
    self.0.load(Ordering::Relaxed)
  }
}

#[derive(Debug, Default)]
pub(crate) struct Metrics {
  pub(crate) submits: Counter,
  pub(crate) thunks_created: Counter,
  pub(crate) thunks_fulfilled: Counter,
  pub(crate) thunks_rejected: Counter,
  pub(crate) batches_created: Counter,
  pub(crate) batches_full: Counter,
  pub(crate) batches_started: Counter,
  pub(crate) batches_done: Counter,
  pub(crate) requests_batched: Counter,
  pub(crate) scheduler_schedules: Counter,
  pub(crate) scheduler_callbacks: Counter,
  pub(crate) limiter_acquires: Counter,
  pub(crate) limiter_tokens: Counter,
  pub(crate) limiter_errors: Counter,
  pub(crate) limiter_releases: Counter,
  pub(crate) action_performs: Counter,
}

impl Metrics {
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      submits: self.submits.get(),
      thunks_created: self.thunks_created.get(),
      thunks_fulfilled: self.thunks_fulfilled.get(),
      thunks_rejected: self.thunks_rejected.get(),
      batches_created: self.batches_created.get(),
      batches_full: self.batches_full.get(),
      batches_started: self.batches_started.get(),
      batches_done: self.batches_done.get(),
      requests_batched: self.requests_batched.get(),
      scheduler_schedules: self.scheduler_schedules.get(),
      scheduler_callbacks: self.scheduler_callbacks.get(),
      limiter_acquires: self.limiter_acquires.get(),
      limiter_tokens: self.limiter_tokens.get(),
      limiter_errors: self.limiter_errors.get(),
      limiter_releases: self.limiter_releases.get(),
      action_performs: self.action_performs.get(),
    }
  }
}

/// Point-in-time copy of a batcher's counters. Counters are read independently, so a snapshot
/// taken while batches are in flight may be momentarily inconsistent across fields
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
  pub submits: u64,
  pub thunks_created: u64,
  pub thunks_fulfilled: u64,
  pub thunks_rejected: u64,
  pub batches_created: u64,
  pub batches_full: u64,
  pub batches_started: u64,
  pub batches_done: u64,
  pub requests_batched: u64,
  pub scheduler_schedules: u64,
  pub scheduler_callbacks: u64,
  pub limiter_acquires: u64,
  pub limiter_tokens: u64,
  pub limiter_errors: u64,
  pub limiter_releases: u64,
  pub action_performs: u64,
}

impl MetricsSnapshot {
  /// Mean number of requests per started batch
  pub fn mean_batch_size(&self) -> Option<f64> {
    if self.batches_started == 0 {
      None
    } else {
      Some(self.requests_batched as f64 / self.batches_started as f64)
    }
  }
}
