use std::{fmt, future::Future};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{batcher::Batcher, error::Result, options::BatcherOptions};

/// The bulk operation a [`Batcher`] coalesces requests into. Responses must align with requests
/// by position; the response for `requests[i]` is delivered to whoever submitted `requests[i]`
#[async_trait]
pub trait BulkAction<Req, Res>: Send + Sync + 'static
where
  Req: Send + 'static,
  Res: Send + 'static,
{
  async fn perform(&self, scope: &CancellationToken, requests: Vec<Req>) -> Vec<Result<Res>>;
}

/// A [`BulkAction`] with batching options declared alongside it, as generated by
/// [`bulk_action`](crate::bulk_action)
pub trait AutoBatch<Req, Res>: BulkAction<Req, Res> + Sized
where
  Req: Send + 'static,
  Res: Clone + Send + Sync + 'static,
{
  fn options() -> BatcherOptions;

  fn into_batcher(self, scope: CancellationToken) -> Batcher<Req, Res> {
    Batcher::with_options(scope, self, Self::options())
  }
}

/// Adapts a closure into a [`BulkAction`]
#[derive(Clone)]
pub struct ActionFn<F> {
  f: F,
}

pub fn action_fn<Req, Res, F, Fut>(f: F) -> ActionFn<F>
where
  Req: Send + 'static,
  Res: Send + 'static,
  F: Fn(CancellationToken, Vec<Req>) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Vec<Result<Res>>> + Send,
{
  ActionFn { f }
}

#[async_trait]
impl<Req, Res, F, Fut> BulkAction<Req, Res> for ActionFn<F>
where
  Req: Send + 'static,
  Res: Send + 'static,
  F: Fn(CancellationToken, Vec<Req>) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Vec<Result<Res>>> + Send,
{
  async fn perform(&self, scope: &CancellationToken, requests: Vec<Req>) -> Vec<Result<Res>> {
    (self.f)(scope.clone(), requests).await
  }
}

impl<F> fmt::Debug for ActionFn<F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ActionFn").finish_non_exhaustive()
  }
}
