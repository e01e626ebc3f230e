use hawk_processors::runner::run_processor;
use hawk_processors::Grouper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_processor("grouper", "grouper", "", |_| Grouper).await
}
