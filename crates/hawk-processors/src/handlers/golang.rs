use anyhow::{anyhow, Context};
use async_trait::async_trait;
use hawk_worker::{HandlerContext, Task, TaskHandler};
use serde_json::Value;

/// Event type stamped on events coming from the Go catcher.
pub const GOLANG_EVENT_TYPE: &str = "errors/golang";

/// Reshapes Go catcher events for the grouper: `payload` moves to `event` and
/// `eventType` is set. Every other field passes through unchanged.
pub struct GolangTransformer {
    target_queue: String,
}

impl GolangTransformer {
    pub fn new(target_queue: impl Into<String>) -> Self {
        Self {
            target_queue: target_queue.into(),
        }
    }
}

fn transform(payload: &str) -> anyhow::Result<String> {
    let mut value: Value = serde_json::from_str(payload).context("decoding Go catcher event")?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| anyhow!("Go catcher event is not a JSON object"))?;

    let event = object.remove("payload").unwrap_or(Value::Null);
    object.insert(
        "eventType".to_string(),
        Value::String(GOLANG_EVENT_TYPE.to_string()),
    );
    object.insert("event".to_string(), event);

    Ok(serde_json::to_string(&value)?)
}

#[async_trait]
impl TaskHandler for GolangTransformer {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> anyhow::Result<()> {
        let payload = ctx
            .task()
            .payload()
            .ok_or_else(|| anyhow!("Task.Payload is nil"))?;

        let transformed = transform(payload)?;
        ctx.send_task(&Task::new(transformed), &self.target_queue)
            .await?;
        Ok(())
    }
}
