pub mod thunk_batcher;
pub mod tokio;
