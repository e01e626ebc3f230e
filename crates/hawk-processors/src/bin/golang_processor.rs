//! Reshapes Go catcher events from `errors/golang` for the grouper.

use hawk_processors::runner::run_processor;
use hawk_processors::GolangTransformer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_processor("golang-processor", "errors/golang", "grouper", |config| {
        GolangTransformer::new(config.target_queue.clone())
    })
    .await
}
