use std::time::{Duration, Instant};

use criterion::{measurement::WallTime, BenchmarkGroup, BenchmarkId};
use futures::future::join_all;
use thunk_batcher::{
  action_fn, Batcher, BatcherOptions, CancellationToken, InstantScheduler, LimitedConcurrency,
  Thunk,
};
use tokio::runtime::Runtime;

fn echo_batcher(max_batch_size: usize) -> Batcher<u64, u64> {
  let action = action_fn(|_scope, requests: Vec<u64>| async move {
    requests.into_iter().map(Ok).collect::<Vec<_>>()
  });

  Batcher::with_options(
    CancellationToken::new(),
    action,
    BatcherOptions::new().max_batch_size(max_batch_size),
  )
}

pub fn bench_handoff(rt: &Runtime, bench: &mut BenchmarkGroup<WallTime>) {
  bench.bench_function("Thunk resolve", |bencher| {
    bencher.to_async(rt).iter_custom(|iters| async move {
      let scope = CancellationToken::new();
      let mut total = Duration::from_secs(0);

      for _i in 0..iters {
        let thunk = Thunk::new();

        {
          let thunk = thunk.clone();
          let scope = scope.clone();
          tokio::task::spawn(async move {
            thunk.set(&scope, Instant::now()).await.ok();
          });
        }

        total = total.saturating_add(thunk.wait(&scope).await.unwrap().elapsed());
      }

      total
    });
  });

  bench.bench_function("Batcher instant dispatch", |bencher| {
    bencher.to_async(rt).iter_custom(|iters| async move {
      let action = action_fn(|_scope, requests: Vec<Instant>| async move {
        requests
          .into_iter()
          .map(|_| Ok(Instant::now()))
          .collect::<Vec<_>>()
      });

      let batcher = Batcher::with_options(
        CancellationToken::new(),
        action,
        BatcherOptions::new().scheduler(InstantScheduler),
      );

      let scope = CancellationToken::new();
      let mut total = Duration::from_secs(0);

      for _i in 0..iters {
        let start = Instant::now();
        let dispatched_at = batcher.submit(start).wait(&scope).await.unwrap();
        total = total.saturating_add(dispatched_at.duration_since(start));
      }

      batcher.shutdown().await.unwrap();

      total
    });
  });

  bench.bench_function("LimitedConcurrency acquire", |bencher| {
    bencher.to_async(rt).iter_custom(|iters| async move {
      use thunk_batcher::ConcurrencyControl;

      let limiter = LimitedConcurrency::new(1);
      let scope = CancellationToken::new();
      let start = Instant::now();

      for _i in 0..iters {
        limiter.acquire(&scope).await.unwrap().release();
      }

      start.elapsed()
    });
  });
}

pub fn bench_batching(rt: &Runtime, bench: &mut BenchmarkGroup<WallTime>, batch_size: u64) {
  bench.bench_with_input(
    BenchmarkId::new("thunk-batcher", batch_size),
    &batch_size,
    |b, batch_size| {
      let batcher = echo_batcher(*batch_size as usize);
      let scope = CancellationToken::new();

      b.to_async(rt).iter(|| {
        let thunks: Vec<_> = (0..*batch_size).map(|i| batcher.submit(i)).collect();
        let scope = scope.clone();

        async move { join_all(thunks.iter().map(|thunk| thunk.wait(&scope))).await }
      })
    },
  );
}
