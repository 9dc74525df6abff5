use thunk_batcher::{bulk_action, AutoBatch, BulkAction, CancellationToken, Result};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Greeting {
  message: String,
}

struct Greeter;

#[bulk_action(max_batch_size = 100, time_window_ms = 50, concurrency = 100)]
impl BulkAction<String, Greeting> for Greeter {
  async fn perform(&self, _scope: &CancellationToken, names: Vec<String>) -> Vec<Result<Greeting>> {
    names
      .into_iter()
      .map(|name| {
        Ok(Greeting {
          message: format!("Hello {name}"),
        })
      })
      .collect()
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let scope = CancellationToken::new();
  let batcher = Greeter.into_batcher(scope.clone());

  let thunk = batcher.submit("World".to_string());

  // Flushes the pending batch and waits for it to finish
  batcher.shutdown().await?;

  let greeting = thunk.wait(&scope).await?;
  println!("value: {greeting:?}");
  println!("{:?}", batcher.metrics());

  Ok(())
}
