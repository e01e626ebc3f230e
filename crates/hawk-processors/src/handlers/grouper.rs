use async_trait::async_trait;
use hawk_worker::{HandlerContext, TaskHandler};

/// End of the processing chain. Grouping storage is not wired yet, so events
/// are only logged.
#[derive(Debug, Default)]
pub struct Grouper;

#[async_trait]
impl TaskHandler for Grouper {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> anyhow::Result<()> {
        ctx.logger()
            .debug(&format!("Received event for grouping: {}", ctx.task()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::RecordingPublisher;
    use hawk_worker::{Logger, Task};

    #[tokio::test]
    async fn test_accepts_any_task_without_forwarding() {
        let publisher = RecordingPublisher::default();
        for task in [Task::new(r#"{"projectId":"p1"}"#), Task::empty()] {
            let ctx = HandlerContext::new(&task, &publisher, Logger::disabled());
            Grouper.handle(&ctx).await.unwrap();
        }
        assert!(publisher.sent().is_empty());
    }
}
