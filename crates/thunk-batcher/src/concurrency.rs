use std::{
  collections::VecDeque,
  fmt,
  future::Future,
  pin::Pin,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
  task::{Context, Poll},
};

use async_trait::async_trait;
use pin_project::{pin_project, pinned_drop};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::{Error, Result};

/// Admission policy gating how many batches may run their bulk action at once
#[async_trait]
pub trait ConcurrencyControl: Send + Sync + 'static {
  async fn acquire(&self, scope: &CancellationToken) -> Result<ConcurrencyToken>;
}

/// A single-use execution capability. Releasing is idempotent and happens on drop if not done
/// explicitly
pub struct ConcurrencyToken {
  release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ConcurrencyToken {
  pub fn new<F>(release: F) -> Self
  where
    F: FnOnce() + Send + Sync + 'static,
  {
    ConcurrencyToken {
      release: Some(Box::new(release)),
    }
  }

  pub fn noop() -> Self {
    ConcurrencyToken { release: None }
  }

  pub fn release(&mut self) {
    if let Some(release) = self.release.take() {
      release();
    }
  }
}

impl Drop for ConcurrencyToken {
  fn drop(&mut self) {
    self.release();
  }
}

impl fmt::Debug for ConcurrencyToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ConcurrencyToken")
      .field("released", &self.release.is_none())
      .finish()
  }
}

/// Issues tokens without ever waiting
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedConcurrency;

#[async_trait]
impl ConcurrencyControl for UnlimitedConcurrency {
  async fn acquire(&self, _scope: &CancellationToken) -> Result<ConcurrencyToken> {
    Ok(ConcurrencyToken::noop())
  }
}

struct Slots {
  available: usize,
  waiters: VecDeque<oneshot::Sender<()>>,
}

struct Shared {
  slots: Mutex<Slots>,
  queue_depth: usize,
  room: Notify,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, Slots> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Hand the slot to the longest waiting live waiter, otherwise return it to the pool
  fn release(&self) {
    let mut slots = self.lock();

    while let Some(waiter) = slots.waiters.pop_front() {
      self.room.notify_one();

      if waiter.send(()).is_ok() {
        return;
      }
    }

    slots.available += 1;
  }
}

/// Bounded concurrency with a FIFO wait list. A released slot is handed directly to the oldest
/// waiter rather than returned to the pool, so waiters are admitted strictly in arrival order
#[derive(Clone)]
pub struct LimitedConcurrency {
  shared: Arc<Shared>,
}

impl LimitedConcurrency {
  /// `limit` concurrent tokens with a wait list of `2 * limit`
  pub fn new(limit: usize) -> Self {
    Self::with_queue_depth(limit, limit.saturating_mul(2))
  }

  pub fn with_queue_depth(limit: usize, queue_depth: usize) -> Self {
    LimitedConcurrency {
      shared: Arc::new(Shared {
        slots: Mutex::new(Slots {
          available: limit,
          waiters: VecDeque::with_capacity(queue_depth),
        }),
        queue_depth: queue_depth.max(1),
        room: Notify::new(),
      }),
    }
  }

  pub fn available(&self) -> usize {
    self.shared.lock().available
  }

  /// Number of waiters queued for a handoff, including abandoned ones not yet skipped
  pub fn waiting(&self) -> usize {
    self.shared.lock().waiters.len()
  }

  fn token(&self) -> ConcurrencyToken {
    let shared = self.shared.clone();
    ConcurrencyToken::new(move || shared.release())
  }
}

impl fmt::Debug for LimitedConcurrency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let slots = self.shared.lock();

    f.debug_struct("LimitedConcurrency")
      .field("available", &slots.available)
      .field("waiting", &slots.waiters.len())
      .field("queue_depth", &self.shared.queue_depth)
      .finish()
  }
}

#[async_trait]
impl ConcurrencyControl for LimitedConcurrency {
  async fn acquire(&self, scope: &CancellationToken) -> Result<ConcurrencyToken> {
    if scope.is_cancelled() {
      return Err(Error::Cancelled);
    }

    let handoff = loop {
      {
        let mut slots = self.shared.lock();

        if slots.available > 0 {
          slots.available -= 1;
          return Ok(self.token());
        }

        if slots.waiters.len() >= self.shared.queue_depth {
          slots.waiters.retain(|waiter| !waiter.is_closed());
        }

        if slots.waiters.len() < self.shared.queue_depth {
          let (tx, rx) = oneshot::channel();
          slots.waiters.push_back(tx);
          break rx;
        }
      }

      tokio::select! {
        _ = self.shared.room.notified() => {}
        _ = scope.cancelled() => return Err(Error::Cancelled),
      }
    };

    Handoff::new(handoff, self.shared.clone(), scope.clone()).await?;

    Ok(self.token())
  }
}

/// Waits for a releaser to hand over a slot. If abandoned after a slot was already handed over,
/// that slot is passed on rather than lost
#[pin_project(PinnedDrop)]
struct Handoff {
  rx: Option<oneshot::Receiver<()>>,
  shared: Arc<Shared>,
  #[pin]
  cancelled: WaitForCancellationFutureOwned,
}

impl Handoff {
  fn new(rx: oneshot::Receiver<()>, shared: Arc<Shared>, scope: CancellationToken) -> Self {
    Handoff {
      rx: Some(rx),
      shared,
      cancelled: scope.cancelled_owned(),
    }
  }
}

impl Future for Handoff {
  type Output = Result<()>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.project();

    let rx = match this.rx.as_mut() {
      Some(rx) => rx,
      None => return Poll::Ready(Err(Error::Cancelled)),
    };

    match Pin::new(rx).poll(cx) {
      Poll::Ready(Ok(())) => {
        this.rx.take();
        return Poll::Ready(Ok(()));
      }
      // Limiter state outlives every waiter, so this only happens if a sender was purged
      Poll::Ready(Err(_)) => {
        this.rx.take();
        return Poll::Ready(Err(Error::Cancelled));
      }
      Poll::Pending => {}
    }

    match this.cancelled.poll(cx) {
      Poll::Ready(()) => Poll::Ready(Err(Error::Cancelled)),
      Poll::Pending => Poll::Pending,
    }
  }
}

#[pinned_drop]
impl PinnedDrop for Handoff {
  fn drop(self: Pin<&mut Self>) {
    let this = self.project();

    if let Some(mut rx) = this.rx.take() {
      rx.close();

      if rx.try_recv().is_ok() {
        this.shared.release();
      }
    }
  }
}

#[cfg(test)]
mod test {
  use std::time::Duration;

  use rand::Rng;
  use tokio::{sync::mpsc, task::yield_now};
  use tokio_util::sync::CancellationToken;

  use super::{ConcurrencyControl, ConcurrencyToken, LimitedConcurrency, UnlimitedConcurrency};

  async fn wait_for_waiters(limiter: &LimitedConcurrency, count: usize) {
    while limiter.waiting() < count {
      yield_now().await;
    }
  }

  #[tokio::test]
  async fn it_always_issues_unlimited_tokens() {
    let scope = CancellationToken::new();
    let limiter = UnlimitedConcurrency;

    let tokens: Vec<ConcurrencyToken> =
      futures::future::join_all((0..64).map(|_| limiter.acquire(&scope)))
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(tokens.len(), 64);
  }

  #[test]
  fn it_releases_once() {
    let released = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let mut token = {
      let released = released.clone();
      ConcurrencyToken::new(move || {
        released.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
      })
    };

    token.release();
    token.release();
    drop(token);

    assert_eq!(released.load(std::sync::atomic::Ordering::Relaxed), 1);
  }

  #[tokio::test]
  async fn it_issues_tokens_up_to_limit() {
    let scope = CancellationToken::new();
    let limit = rand::thread_rng().gen_range(3..10);
    let limiter = LimitedConcurrency::new(limit);

    let mut tokens = Vec::new();
    for _ in 0..limit {
      tokens.push(limiter.acquire(&scope).await.unwrap());
    }

    assert_eq!(limiter.available(), 0);

    drop(tokens);

    assert_eq!(limiter.available(), limit);
  }

  #[tokio::test]
  async fn it_blocks_at_limit_until_cancelled() {
    let scope = CancellationToken::new();
    let limiter = LimitedConcurrency::new(1);
    let _token = limiter.acquire(&scope).await.unwrap();

    let waiter = {
      let limiter = limiter.clone();
      let scope = scope.clone();
      tokio::spawn(async move { limiter.acquire(&scope).await })
    };

    wait_for_waiters(&limiter, 1).await;
    scope.cancel();

    assert!(waiter.await.unwrap().unwrap_err().is_cancelled());
  }

  #[tokio::test]
  async fn it_rejects_cancelled_scope() {
    let scope = CancellationToken::new();
    scope.cancel();

    let limiter = LimitedConcurrency::new(4);

    assert!(limiter.acquire(&scope).await.unwrap_err().is_cancelled());
    assert_eq!(limiter.available(), 4);
  }

  #[tokio::test]
  async fn it_hands_off_in_fifo_order() {
    let scope = CancellationToken::new();
    let limiter = LimitedConcurrency::new(1);
    let token = limiter.acquire(&scope).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();

    for i in 0..4 {
      {
        let limiter = limiter.clone();
        let scope = scope.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
          let token = limiter.acquire(&scope).await.unwrap();
          drop(token);
          tx.send(i).unwrap();
        });
      }

      wait_for_waiters(&limiter, i + 1).await;
    }

    drop(token);

    let mut order = Vec::new();
    for _ in 0..4 {
      order.push(rx.recv().await.unwrap());
    }

    assert_eq!(order, vec![0, 1, 2, 3]);
    assert_eq!(limiter.available(), 1);
  }

  #[tokio::test]
  async fn it_skips_abandoned_waiters() {
    let scope = CancellationToken::new();
    let limiter = LimitedConcurrency::new(1);
    let token = limiter.acquire(&scope).await.unwrap();

    let abandoned_scope = CancellationToken::new();
    let abandoned = {
      let limiter = limiter.clone();
      let scope = abandoned_scope.clone();
      tokio::spawn(async move { limiter.acquire(&scope).await })
    };

    wait_for_waiters(&limiter, 1).await;

    let waiter = {
      let limiter = limiter.clone();
      let scope = scope.clone();
      tokio::spawn(async move { limiter.acquire(&scope).await.map(drop) })
    };

    wait_for_waiters(&limiter, 2).await;

    abandoned_scope.cancel();
    assert!(abandoned.await.unwrap().unwrap_err().is_cancelled());

    drop(token);

    tokio::time::timeout(Duration::from_secs(1), waiter)
      .await
      .unwrap()
      .unwrap()
      .unwrap();

    assert_eq!(limiter.available(), 1);
    assert_eq!(limiter.waiting(), 0);
  }

  #[tokio::test]
  async fn it_returns_slot_when_dropped_after_handoff() {
    let scope = CancellationToken::new();
    let limiter = LimitedConcurrency::new(1);
    let token = limiter.acquire(&scope).await.unwrap();

    {
      let acquire = limiter.acquire(&scope);
      futures::pin_mut!(acquire);

      assert!(futures::poll!(acquire.as_mut()).is_pending());
      assert_eq!(limiter.waiting(), 1);

      // The slot is handed to the pending acquire, which is then dropped without observing it
      drop(token);
      assert_eq!(limiter.waiting(), 0);
    }

    assert_eq!(limiter.available(), 1);
  }

  #[tokio::test]
  async fn it_waits_for_room_in_wait_list() {
    let scope = CancellationToken::new();
    let limiter = LimitedConcurrency::with_queue_depth(1, 1);
    let token = limiter.acquire(&scope).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();

    for i in 0..2 {
      let limiter = limiter.clone();
      let scope = scope.clone();
      let tx = tx.clone();

      tokio::spawn(async move {
        let token = limiter.acquire(&scope).await.unwrap();
        drop(token);
        tx.send(i).unwrap();
      });
    }

    wait_for_waiters(&limiter, 1).await;
    yield_now().await;
    assert_eq!(limiter.waiting(), 1);

    drop(token);

    let mut admitted = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    admitted.sort_unstable();

    assert_eq!(admitted, vec![0, 1]);
    assert_eq!(limiter.available(), 1);
  }

  #[tokio::test]
  async fn it_defaults_wait_list_to_twice_the_limit() {
    let scope = CancellationToken::new();
    let limiter = LimitedConcurrency::new(2);
    let tokens = vec![
      limiter.acquire(&scope).await.unwrap(),
      limiter.acquire(&scope).await.unwrap(),
    ];

    let (tx, mut rx) = mpsc::unbounded_channel();

    for i in 0..5 {
      let limiter = limiter.clone();
      let scope = scope.clone();
      let tx = tx.clone();

      tokio::spawn(async move {
        let token = limiter.acquire(&scope).await.unwrap();
        drop(token);
        tx.send(i).unwrap();
      });
    }

    wait_for_waiters(&limiter, 4).await;

    for _ in 0..8 {
      yield_now().await;
    }

    assert_eq!(limiter.waiting(), 4);

    drop(tokens);

    let mut admitted = Vec::new();
    for _ in 0..5 {
      admitted.push(rx.recv().await.unwrap());
    }
    admitted.sort_unstable();

    assert_eq!(admitted, vec![0, 1, 2, 3, 4]);
    assert_eq!(limiter.available(), 2);
  }
}
