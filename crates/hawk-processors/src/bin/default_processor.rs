//! Validates events from `errors/default` and forwards them to the grouper.

use hawk_processors::runner::run_processor;
use hawk_processors::DefaultProcessor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_processor("default-processor", "errors/default", "grouper", |config| {
        DefaultProcessor::new(config.target_queue.clone())
    })
    .await
}
