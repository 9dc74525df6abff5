use std::{
  collections::VecDeque,
  fmt,
  panic::AssertUnwindSafe,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::FutureExt;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, trace, warn};

use crate::{
  action::BulkAction,
  batch::{Batch, BatchSignals},
  concurrency::ConcurrencyControl,
  error::{Error, Result},
  metrics::{Metrics, MetricsSnapshot},
  options::BatcherOptions,
  scheduler::{Scheduler, SchedulerCallback},
  thunk::Thunk,
};

// Upper bound on per-batch preallocation so that huge size limits don't reserve unused memory
const MAX_PREALLOCATED_LEN: usize = 1024;

struct Queue<Req, Res> {
  batches: VecDeque<Batch<Req, Res>>,
  closed: bool,
  next_id: u64,
}

struct Inner<Req, Res> {
  scope: CancellationToken,
  queue: Mutex<Queue<Req, Res>>,
  in_flight: TaskTracker,
  action: Box<dyn BulkAction<Req, Res>>,
  scheduler: Arc<dyn Scheduler>,
  concurrency_control: Arc<dyn ConcurrencyControl>,
  max_batch_size: usize,
  metrics: Metrics,
}

/// Coalesces individually submitted requests into batches that are dispatched to a single
/// [`BulkAction`] call, resolving each submitter's [`Thunk`] with its positional response.
///
/// Batches open as requests arrive and are dispatched oldest first whenever their scheduler fires:
/// by default once full or two seconds after creation, or immediately on [`Batcher::dispatch`].
/// Handles are cheap to clone and share one queue. Requires a Tokio runtime; schedulers run as
/// spawned tasks.
pub struct Batcher<Req, Res>
where
  Req: Send + 'static,
  Res: Send + 'static,
{
  inner: Arc<Inner<Req, Res>>,
}

impl<Req, Res> Clone for Batcher<Req, Res>
where
  Req: Send + 'static,
  Res: Send + 'static,
{
  fn clone(&self) -> Self {
    Batcher {
      inner: self.inner.clone(),
    }
  }
}

impl<Req, Res> Batcher<Req, Res>
where
  Req: Send + 'static,
  Res: Clone + Send + Sync + 'static,
{
  /// Batcher with up to 100 requests per batch, a two second time window and unlimited
  /// concurrency. Cancelling `scope` stops scheduling and rejects batches not yet dispatched
  pub fn new<A>(scope: CancellationToken, action: A) -> Self
  where
    A: BulkAction<Req, Res>,
  {
    Self::with_options(scope, action, BatcherOptions::default())
  }

  pub fn with_options<A>(scope: CancellationToken, action: A, options: BatcherOptions) -> Self
  where
    A: BulkAction<Req, Res>,
  {
    let BatcherOptions {
      max_batch_size,
      scheduler,
      concurrency_control,
    } = options;

    Batcher {
      inner: Arc::new(Inner {
        scope,
        queue: Mutex::new(Queue {
          batches: VecDeque::new(),
          closed: false,
          next_id: 0,
        }),
        in_flight: TaskTracker::new(),
        action: Box::new(action),
        scheduler,
        concurrency_control,
        max_batch_size,
        metrics: Metrics::default(),
      }),
    }
  }

  /// Enqueue `request` into the open batch and return its thunk without waiting. After
  /// [`Batcher::shutdown`] the thunk is already rejected with [`Error::Cancelled`]
  ///
  /// Takes no scope: submitting never blocks, so cancellation applies to [`Thunk::wait`] instead
  pub fn submit(&self, request: Req) -> Thunk<Res> {
    let inner = &self.inner;
    let thunk = Thunk::new();

    inner.metrics.submits.incr();
    inner.metrics.thunks_created.incr();

    let mut queue = inner.lock();

    if queue.closed {
      drop(queue);
      inner.settle(&thunk, Err(Error::Cancelled));
      return thunk;
    }

    let max_batch_size = inner.max_batch_size;

    match queue
      .batches
      .back_mut()
      .filter(|batch| !batch.is_full(max_batch_size))
    {
      Some(batch) => inner.append(batch, request, thunk.clone()),
      None => {
        let id = queue.next_id;
        queue.next_id += 1;

        let mut batch = Batch::new(
          id,
          max_batch_size.min(MAX_PREALLOCATED_LEN),
          inner.in_flight.token(),
        );

        inner.metrics.batches_created.incr();
        trace!(batch = id, "batch created");

        self.spawn_scheduler(batch.signals.clone());
        inner.append(&mut batch, request, thunk.clone());
        queue.batches.push_back(batch);
      }
    }

    thunk
  }

  /// Request immediate dispatch of every queued batch rather than waiting for its time window
  pub fn dispatch(&self) {
    let queue = self.inner.lock();

    let flushed = queue
      .batches
      .iter()
      .filter(|batch| batch.request_dispatch())
      .count();

    trace!(flushed, "flush requested");
  }

  /// Stop accepting requests, flush every queued batch and wait until all of them are processed
  pub async fn shutdown(&self) -> Result<()> {
    self.inner.lock().closed = true;
    self.dispatch();

    self.inner.in_flight.close();
    self.inner.in_flight.wait().await;

    debug!("batcher shut down");

    Ok(())
  }

  pub fn is_closed(&self) -> bool {
    self.inner.lock().closed
  }

  /// Batches created but not yet taken for dispatch
  pub fn queued_batches(&self) -> usize {
    self.inner.lock().batches.len()
  }

  pub fn max_batch_size(&self) -> usize {
    self.inner.max_batch_size
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.inner.metrics.snapshot()
  }

  fn spawn_scheduler(&self, signals: BatchSignals) {
    let inner = self.inner.clone();

    let callback = {
      let inner = inner.clone();
      SchedulerCallback::new(move || {
        let inner = inner.clone();
        async move { inner.dispatch_next().await }.boxed()
      })
    };

    inner.metrics.scheduler_schedules.incr();

    tokio::spawn(async move {
      inner
        .scheduler
        .schedule(inner.scope.clone(), signals, callback)
        .await;

      // Schedulers return without dispatching once the scope is cancelled. Dispatch always takes
      // the oldest batch rather than this one, so every batch still queued is rejected here
      if inner.scope.is_cancelled() {
        inner.abandon_queued();
      }
    });
  }
}

impl<Req, Res> Inner<Req, Res>
where
  Req: Send + 'static,
  Res: Clone + Send + Sync + 'static,
{
  fn lock(&self) -> MutexGuard<'_, Queue<Req, Res>> {
    self.queue.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn append(&self, batch: &mut Batch<Req, Res>, request: Req, thunk: Thunk<Res>) {
    batch.push(request, thunk);

    if batch.is_full(self.max_batch_size) {
      batch.signals.full().fire();
      self.metrics.batches_full.incr();
    }
  }

  fn settle(&self, thunk: &Thunk<Res>, result: Result<Res>) {
    if result.is_ok() {
      self.metrics.thunks_fulfilled.incr();
    } else {
      self.metrics.thunks_rejected.incr();
    }

    thunk.resolve(result);
  }

  fn reject_all(&self, thunks: &[Thunk<Res>], err: Error) {
    for thunk in thunks {
      self.settle(thunk, Err(err.clone()));
    }
  }

  /// Pop and process the oldest batch. Extra invocations find the queue empty, or take a batch
  /// that would otherwise be taken by its own trigger, and so never process a batch twice
  async fn dispatch_next(&self) {
    self.metrics.scheduler_callbacks.incr();

    let batch = self.lock().batches.pop_front();

    let Some(Batch {
      id,
      requests,
      thunks,
      signals,
      in_flight,
    }) = batch
    else {
      trace!("dispatch found no queued batch");
      return;
    };

    let size = requests.len();

    self.metrics.batches_started.incr();
    self.metrics.requests_batched.add(size as u64);
    debug!(batch = id, size, "dispatching batch");

    self.metrics.limiter_acquires.incr();

    let mut token = match self.concurrency_control.acquire(&self.scope).await {
      Ok(token) => {
        self.metrics.limiter_tokens.incr();
        token
      }
      Err(err) => {
        self.metrics.limiter_errors.incr();
        debug!(batch = id, error = %err, "concurrency control rejected batch");

        self.reject_all(&thunks, err);
        self.metrics.batches_done.incr();
        drop(in_flight);
        return;
      }
    };

    self.metrics.action_performs.incr();

    let responses = AssertUnwindSafe(self.action.perform(&self.scope, requests))
      .catch_unwind()
      .await;

    token.release();
    self.metrics.limiter_releases.incr();

    match responses {
      Ok(responses) => self.resolve(id, &thunks, responses),
      Err(_) => {
        warn!(batch = id, size, "bulk action panicked");
        self.reject_all(&thunks, Error::ActionPanicked);
      }
    }

    self.metrics.batches_done.incr();
    debug!(
      batch = id,
      size,
      lifetime = ?signals.created_at().elapsed(),
      "batch done"
    );

    drop(in_flight);
  }

  fn resolve(&self, id: u64, thunks: &[Thunk<Res>], responses: Vec<Result<Res>>) {
    if responses.len() != thunks.len() {
      warn!(
        batch = id,
        requests = thunks.len(),
        responses = responses.len(),
        "bulk action response count does not match request count"
      );
    }

    let mut responses = responses.into_iter();

    for (index, thunk) in thunks.iter().enumerate() {
      let response = responses
        .next()
        .unwrap_or_else(|| Err(Error::MissingResponse { index }));

      self.settle(thunk, response);
    }
  }

  /// Remove every queued batch and reject its thunks
  fn abandon_queued(&self) {
    let batches = std::mem::take(&mut self.lock().batches);

    for batch in batches {
      debug!(batch = batch.id, size = batch.len(), "scope cancelled, rejecting batch");
      self.reject_all(&batch.thunks, Error::Cancelled);
    }
  }
}

impl<Req, Res> fmt::Debug for Batcher<Req, Res>
where
  Req: Send + 'static,
  Res: Send + 'static,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let queue = self.inner.queue.lock().unwrap_or_else(PoisonError::into_inner);

    f.debug_struct("Batcher")
      .field("queued_batches", &queue.batches.len())
      .field("closed", &queue.closed)
      .field("max_batch_size", &self.inner.max_batch_size)
      .field("in_flight", &self.inner.in_flight.len())
      .finish()
  }
}
