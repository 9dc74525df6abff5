#![cfg_attr(docsrs, feature(doc_cfg))]
//! Coalesce individually submitted requests into bulk calls.
//!
//! A [`Batcher`] queues each request into the open batch and immediately hands back a [`Thunk`].
//! Batches dispatch oldest first when their [`Scheduler`] fires, run through a [`BulkAction`]
//! under a [`ConcurrencyControl`] and resolve every thunk with the response at the matching
//! position.
//!
//! ```ignore
//! use thunk_batcher::{bulk_action, BulkAction, AutoBatch, CancellationToken, Result};
//!
//! struct FetchUsers;
//!
//! #[bulk_action(max_batch_size = 50, time_window_ms = 10, concurrency = 4)]
//! impl BulkAction<UserId, User> for FetchUsers {
//!   async fn perform(&self, scope: &CancellationToken, ids: Vec<UserId>) -> Vec<Result<User>> {
//!     fetch_users(scope, ids).await
//!   }
//! }
//!
//! let batcher = FetchUsers.into_batcher(CancellationToken::new());
//! let user = batcher.submit(user_id).wait(&scope).await?;
//! ```

#[macro_use(assert_impl_all)]
extern crate static_assertions;
extern crate self as thunk_batcher;

mod action;
mod batch;
mod batcher;
mod concurrency;
mod error;
mod metrics;
mod options;
mod scheduler;
mod thunk;

#[doc(hidden)]
pub use async_trait::async_trait;
pub use derive_thunk_batcher::bulk_action;
pub use tokio_util::sync::CancellationToken;

pub use action::{action_fn, ActionFn, AutoBatch, BulkAction};
pub use batch::{BatchSignals, Signal};
pub use batcher::Batcher;
pub use concurrency::{
  ConcurrencyControl, ConcurrencyToken, LimitedConcurrency, UnlimitedConcurrency,
};
pub use error::{BoxError, Error, Result, SharedError};
pub use metrics::MetricsSnapshot;
pub use options::{BatcherOptions, DEFAULT_MAX_BATCH_SIZE};
pub use scheduler::{
  InstantScheduler, Scheduler, SchedulerCallback, TimeWindowScheduler, DEFAULT_TIME_WINDOW,
};
pub use thunk::Thunk;

assert_impl_all!(Batcher<u64, String>: Send, Sync, Clone);
assert_impl_all!(Thunk<String>: Send, Sync, Clone);
assert_impl_all!(ConcurrencyToken: Send, Sync);
assert_impl_all!(LimitedConcurrency: Send, Sync, Clone);
assert_impl_all!(BatcherOptions: Send, Sync, Clone);
assert_impl_all!(Error: Send, Sync, Clone);
