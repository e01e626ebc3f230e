use anyhow::anyhow;
use async_trait::async_trait;
use hawk_worker::{HandlerContext, TaskHandler};

use crate::event::Event;

/// Validates events from `errors/default` and forwards them, untouched, to the
/// grouper.
pub struct DefaultProcessor {
    target_queue: String,
}

impl DefaultProcessor {
    pub fn new(target_queue: impl Into<String>) -> Self {
        Self {
            target_queue: target_queue.into(),
        }
    }
}

#[async_trait]
impl TaskHandler for DefaultProcessor {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> anyhow::Result<()> {
        let task = ctx.task();
        let Some(payload) = task.payload() else {
            let err = anyhow!("Task.Payload is nil");
            ctx.logger().error(&format!("Error in the context: {}", err));
            return Err(err);
        };

        let event: Event = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                ctx.logger().debug("Failing the task");
                return Err(e.into());
            }
        };

        if !event.is_routable() {
            let err = anyhow!("no projectId or no payload.type fields");
            ctx.logger().warn(&format!("Fail the task: {}", err));
            return Err(err);
        }

        ctx.logger().debug("Resending the task");
        ctx.send_task(task, &self.target_queue).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::RecordingPublisher;
    use hawk_worker::{Logger, Task};

    const VALID: &str = r#"{"projectId":"sample","payload":{"title":"payload title","type":"sample error","backtrace":[{"file":"main.js","line":42,"column":42,"function":null,"sourceCode":[{"line":42,"content":"some content"}]}],"context":{},"catcherVersion":"0.1.0","timestamp":1659587713},"catcherType":"errors/nodejs"}"#;

    async fn handle(task: Task, publisher: &RecordingPublisher) -> anyhow::Result<()> {
        let ctx = HandlerContext::new(&task, publisher, Logger::disabled());
        DefaultProcessor::new("grouper").handle(&ctx).await
    }

    #[tokio::test]
    async fn test_valid_event_is_resent_unmodified() {
        let publisher = RecordingPublisher::default();
        handle(Task::new(VALID), &publisher).await.unwrap();
        assert_eq!(
            publisher.sent(),
            vec![("grouper".to_string(), VALID.to_string())]
        );
    }

    #[tokio::test]
    async fn test_missing_payload_fails() {
        let publisher = RecordingPublisher::default();
        let err = handle(Task::empty(), &publisher).await.unwrap_err();
        assert_eq!(err.to_string(), "Task.Payload is nil");
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_structure_fails() {
        let publisher = RecordingPublisher::default();
        let task = Task::new(r#"{"projectId": "esf", "payload":{"type": 777}}"#);
        let err = handle(task, &publisher).await.unwrap_err();
        assert!(err.downcast_ref::<serde_json::Error>().is_some());
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_project_fails() {
        let publisher = RecordingPublisher::default();
        let task = Task::new(r#"{"some": "esf", "payload":{"type": ""}}"#);
        let err = handle(task, &publisher).await.unwrap_err();
        assert_eq!(err.to_string(), "no projectId or no payload.type fields");
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_type_fails() {
        let publisher = RecordingPublisher::default();
        let task = Task::new(r#"{"projectId":"p1","payload":{"title":"boom"}}"#);
        assert!(handle(task, &publisher).await.is_err());
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_empty_target_queue_drops_the_event() {
        let publisher = RecordingPublisher::default();
        let task = Task::new(VALID);
        let ctx = HandlerContext::new(&task, &publisher, Logger::disabled());
        DefaultProcessor::new("").handle(&ctx).await.unwrap();
        assert!(publisher.sent().is_empty());
    }
}
