//! Worker dispatcher: consume, handle, settle.
//!
//! Messages are processed strictly one at a time, in delivery order. Each one
//! is acknowledged or rejected exactly once, after its handler returns.
//!
//! Shutdown: cancelling the token passed to [`Worker::run`] (or calling
//! [`Worker::stop`]) lets the handler in flight finish, stops the consumer and
//! closes both broker connections before `run` returns.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::{Arc, Mutex, PoisonError};

use hawk_broker::{Message, QueueConsumer, QueuePublisher};
use hawk_core::{ErrorMetadata, LogLevel, Logger, Task, WorkerError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::context::{HandlerContext, TaskHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl Display for WorkerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Draining => write!(f, "draining"),
            WorkerState::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct Worker {
    consumer: Arc<QueueConsumer>,
    deliveries: Mutex<Option<mpsc::Receiver<Message>>>,
    publisher: Arc<QueuePublisher>,
    handler: Arc<dyn TaskHandler>,
    state: watch::Sender<WorkerState>,
    stop: CancellationToken,
    logger: Logger,
}

impl Worker {
    /// `deliveries` is the receiver returned alongside `consumer` by
    /// [`QueueConsumer::new`].
    pub fn new(
        consumer: QueueConsumer,
        deliveries: mpsc::Receiver<Message>,
        publisher: QueuePublisher,
        handler: Arc<dyn TaskHandler>,
        logger: Logger,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            consumer: Arc::new(consumer),
            deliveries: Mutex::new(Some(deliveries)),
            publisher: Arc::new(publisher),
            handler,
            state,
            stop: CancellationToken::new(),
            logger,
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Ask a running worker to stop. Same effect as cancelling the token given
    /// to [`run`](Self::run); calling it more than once is harmless.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Process messages until `ctx` is cancelled or the consumer gives up.
    ///
    /// Returns `Ok(())` on cancellation and the consumer's error when
    /// reconnection is exhausted. A worker runs at most once.
    pub async fn run(&self, ctx: CancellationToken) -> Result<(), WorkerError> {
        let mut deliveries = self
            .deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(WorkerError::AlreadyRunning)?;

        self.run_loop(&mut deliveries, ctx)
            .instrument(self.logger.span().clone())
            .await
    }

    async fn run_loop(
        &self,
        deliveries: &mut mpsc::Receiver<Message>,
        ctx: CancellationToken,
    ) -> Result<(), WorkerError> {
        self.state.send_replace(WorkerState::Running);
        tracing::info!(queue = %self.consumer.queue(), "Worker started");

        let receive_cancel = CancellationToken::new();
        let mut receive = {
            let consumer = Arc::clone(&self.consumer);
            let cancel = receive_cancel.clone();
            tokio::spawn(async move { consumer.receive(cancel).await }.in_current_span())
        };
        let mut receive_finished = false;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => break Ok(()),
                _ = self.stop.cancelled() => break Ok(()),
                message = deliveries.recv() => match message {
                    Some(message) => self.process(message).await,
                    None => break Ok(()),
                },
                joined = &mut receive => {
                    receive_finished = true;
                    break match joined {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(WorkerError::from(e)),
                        Err(e) => Err(WorkerError::ReceiveTask(e.to_string())),
                    };
                }
            }
        };

        self.state.send_replace(WorkerState::Draining);
        tracing::info!("Worker draining");

        receive_cancel.cancel();
        if !receive_finished {
            match receive.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Consumer ended with error while draining"),
                Err(e) => tracing::error!(error = %e, "Consumer task failed while draining"),
            }
        }

        if let Err(e) = self.consumer.close().await {
            tracing::warn!(error = %e, "Failed to close consumer");
        }
        if let Err(e) = self.publisher.close().await {
            tracing::warn!(error = %e, "Failed to close publisher");
        }

        self.state.send_replace(WorkerState::Stopped);
        match &outcome {
            Ok(()) => tracing::info!("Worker stopped"),
            Err(e) => tracing::error!(error = %e, code = e.error_code(), "Worker stopped on error"),
        }
        outcome
    }

    /// Parse, handle and settle one message.
    async fn process(&self, mut message: Message) {
        let logger = self.logger.for_delivery(message.delivery_tag());

        let outcome = match Task::from_body(message.body()) {
            Ok(task) => {
                let ctx = HandlerContext::new(&task, self.publisher.as_ref(), logger.clone());
                self.handler
                    .handle(&ctx)
                    .instrument(logger.span().clone())
                    .await
                    .map_err(WorkerError::Handler)
            }
            Err(e) => Err(e),
        };

        let settled = match &outcome {
            Ok(()) => message.ack().await,
            Err(e) => {
                report_rejection(&logger, e);
                message.reject().await
            }
        };

        match settled {
            Ok(()) => tracing::debug!(
                parent: logger.span(),
                disposition = ?message.disposition(),
                "Message settled"
            ),
            Err(e) => tracing::error!(
                parent: logger.span(),
                error = %e,
                code = e.error_code(),
                "Failed to settle message"
            ),
        }
    }
}

fn report_rejection(logger: &Logger, err: &WorkerError) {
    let span = logger.span();
    let code = err.error_code();
    match err.log_level() {
        LogLevel::Debug => tracing::debug!(parent: span, error = %err, code, "Rejecting message"),
        LogLevel::Warn => tracing::warn!(parent: span, error = %err, code, "Rejecting message"),
        LogLevel::Error => tracing::error!(parent: span, error = %err, code, "Rejecting message"),
    }
}
