use std::time::{Duration, Instant};

use criterion::{measurement::WallTime, BenchmarkGroup, BenchmarkId};
use futures::future::join_all;
use tokio::{
  runtime::Runtime,
  spawn,
  sync::{mpsc, oneshot},
};

type Request = (u64, oneshot::Sender<u64>);

// Hand-rolled coalescing: drain whatever is queued into one Vec and answer it in a single pass
fn spawn_reactor(max_batch_size: usize) -> mpsc::UnboundedSender<Request> {
  let (tx, mut rx) = mpsc::unbounded_channel::<Request>();

  spawn(async move {
    let mut batch: Vec<Request> = Vec::with_capacity(max_batch_size);

    while rx.recv_many(&mut batch, max_batch_size).await > 0 {
      for (request, tx) in batch.drain(..) {
        tx.send(request).ok();
      }
    }
  });

  tx
}

async fn push_echo(queue: &mpsc::UnboundedSender<Request>, request: u64) -> u64 {
  let (tx, rx) = oneshot::channel();

  queue.send((request, tx)).ok();

  rx.await.unwrap()
}

pub fn bench_handoff(rt: &Runtime, bench: &mut BenchmarkGroup<WallTime>) {
  bench.bench_function("tokio::sync::oneshot receive", |bencher| {
    bencher.to_async(rt).iter_custom(|iters| async move {
      let mut total = Duration::from_secs(0);

      for _i in 0..iters {
        let (tx, rx) = oneshot::channel();

        tokio::task::spawn(async move {
          tx.send(Instant::now()).ok();
        });

        total = total.saturating_add(rx.await.unwrap().elapsed());
      }

      total
    });
  });
}

pub fn bench_batching(rt: &Runtime, bench: &mut BenchmarkGroup<WallTime>, batch_size: u64) {
  bench.bench_with_input(
    BenchmarkId::new("tokio::mpsc", batch_size),
    &batch_size,
    |b, batch_size| {
      let queue = rt.block_on(async { spawn_reactor(*batch_size as usize) });

      b.to_async(rt).iter(|| {
        let queue = queue.clone();
        let batch_size = *batch_size;

        async move {
          join_all((0..batch_size).map(|request| push_echo(&queue, request))).await
        }
      })
    },
  );
}
