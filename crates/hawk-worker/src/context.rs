//! Handler contract
//!
//! Business handlers implement [`TaskHandler`]. For every delivery the worker
//! builds a [`HandlerContext`] that lends the handler the current task, a way
//! to forward tasks to other queues and a logger scoped to the delivery. The
//! context lives for one handler call only.

use async_trait::async_trait;
use hawk_broker::Publisher;
use hawk_core::{Logger, Task, WorkerError};

pub struct HandlerContext<'a> {
    task: &'a Task,
    publisher: &'a dyn Publisher,
    logger: Logger,
}

impl<'a> HandlerContext<'a> {
    pub fn new(task: &'a Task, publisher: &'a dyn Publisher, logger: Logger) -> Self {
        Self {
            task,
            publisher,
            logger,
        }
    }

    /// The task being handled. Its payload may be absent.
    pub fn task(&self) -> &Task {
        self.task
    }

    /// Forward `task` to `queue`.
    ///
    /// An empty `queue` means "do not forward" and returns `Ok(())` without
    /// touching the publisher. A task without payload cannot be forwarded.
    pub async fn send_task(&self, task: &Task, queue: &str) -> Result<(), WorkerError> {
        if queue.is_empty() {
            self.logger.debug("No target queue, task not forwarded");
            return Ok(());
        }

        let payload = task.payload().ok_or(WorkerError::MissingPayload)?;
        self.publisher.send_to(queue, payload.as_bytes()).await?;
        Ok(())
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

/// Business logic invoked once per delivery.
///
/// Returning `Ok` acknowledges the message; returning an error rejects it
/// without requeue.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> anyhow::Result<()>;
}
