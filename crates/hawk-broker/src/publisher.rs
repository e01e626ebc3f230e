//! Queue publisher.

use async_trait::async_trait;
use hawk_core::{BrokerError, Logger};
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::backoff::BackoffConfig;
use crate::connection::ConnectionManager;

/// Forwarding capability handed to handlers.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` to `queue`, retrying until it succeeds or the retry
    /// budget is spent.
    async fn send_to(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError>;
}

/// Publishes persistent JSON messages through the default exchange.
///
/// Every send runs its own backoff sequence: wait the next delay, connect if
/// needed, publish. A failed publish drops the connection so the following
/// attempt re-dials. Sends are serialised, so one publisher may be shared by
/// concurrent callers.
pub struct QueuePublisher {
    connection: ConnectionManager,
    queue: String,
    backoff: BackoffConfig,
    send_lock: Mutex<()>,
    logger: Logger,
}

impl QueuePublisher {
    /// `queue` is the default target; an empty name disables [`send`](Self::send).
    pub fn new(connection: ConnectionManager, queue: impl Into<String>, logger: Logger) -> Self {
        Self {
            connection,
            queue: queue.into(),
            backoff: BackoffConfig::publish_retry(),
            send_lock: Mutex::new(()),
            logger,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Dial the broker and declare the default target queue.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.connection.connect().await?;
        if !self.queue.is_empty() {
            let session = self.connection.session().await?;
            session.declare_queue(&self.queue).await?;
        }
        Ok(())
    }

    /// Publish to the default target queue.
    pub async fn send(&self, payload: &[u8]) -> Result<(), BrokerError> {
        if self.queue.is_empty() {
            tracing::debug!(parent: self.logger.span(), "No target queue, nothing to send");
            return Ok(());
        }
        self.send_to(&self.queue, payload).await
    }

    pub async fn close(&self) -> Result<(), BrokerError> {
        self.connection.close().await
    }

    async fn publish_with_retry(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let _guard = self.send_lock.lock().await;
        let mut backoff = self.backoff.start();

        loop {
            let Some(delay) = backoff.next_delay() else {
                let err = backoff.exhausted("publishing");
                tracing::error!(queue, error = %err, "Giving up on message");
                return Err(err);
            };
            tokio::time::sleep(delay).await;

            match self.try_publish(queue, payload).await {
                Ok(()) => {
                    tracing::debug!(queue, attempt = backoff.attempts(), "Message published");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        queue,
                        attempt = backoff.attempts(),
                        error = %e,
                        "Publish attempt failed"
                    );
                    self.connection.disconnect().await;
                }
            }
        }
    }

    async fn try_publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if !self.connection.is_connected().await {
            self.connect().await?;
        }
        let session = self.connection.session().await?;
        if queue != self.queue {
            session.declare_queue(queue).await?;
        }
        session.publish(queue, payload).await
    }
}

#[async_trait]
impl Publisher for QueuePublisher {
    async fn send_to(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.publish_with_retry(queue, payload)
            .instrument(self.logger.span().clone())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBroker, Published};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn publisher(broker: &MemoryBroker, queue: &str) -> QueuePublisher {
        let connection = ConnectionManager::new("publisher", Arc::new(broker.connector()));
        QueuePublisher::new(connection, queue, Logger::disabled())
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_and_publishes_once() {
        let broker = MemoryBroker::new();
        broker.fail_next_publishes(2);
        let publisher = publisher(&broker, "grouper");
        let started = Instant::now();

        publisher.send(br#"{"projectId":"p1"}"#).await.unwrap();

        assert_eq!(
            broker.published(),
            vec![Published {
                queue: "grouper".to_string(),
                payload: br#"{"projectId":"p1"}"#.to_vec(),
            }]
        );
        let offsets: Vec<u64> = broker
            .publish_attempts()
            .iter()
            .map(|at| (*at - started).as_secs())
            .collect();
        assert_eq!(offsets, vec![1, 3, 7]);
        // Each failure drops the connection; each attempt re-dials.
        assert_eq!(broker.connect_attempts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_one_minute() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(true);
        let publisher = publisher(&broker, "grouper");
        let started = Instant::now();

        let err = publisher.send(b"{}").await.unwrap_err();
        assert!(matches!(
            err,
            BrokerError::BackoffExhausted {
                operation: "publishing",
                ..
            }
        ));
        // 1, 3, 7, 15, 30, 45, 60, 75; the budget is spent at 75s.
        assert_eq!(broker.connect_attempts().len(), 8);
        assert_eq!(Instant::now() - started, Duration::from_secs(75));
        assert!(broker.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_carry_over_between_sends() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(true);
        let publisher = publisher(&broker, "grouper");
        assert!(publisher.send(b"{}").await.is_err());

        broker.refuse_connections(false);
        let started = Instant::now();
        publisher.send(b"{}").await.unwrap();
        assert_eq!(Instant::now() - started, Duration::from_secs(1));
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reuses_live_connection() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker, "grouper");
        publisher.send(b"{\"n\":1}").await.unwrap();
        publisher.send(b"{\"n\":2}").await.unwrap();
        assert_eq!(broker.connect_attempts().len(), 1);
        assert_eq!(broker.declared_queues(), vec!["grouper".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn send_to_declares_other_queues() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker, "grouper");
        publisher.send_to("errors/archive", b"{}").await.unwrap();
        assert_eq!(
            broker.declared_queues(),
            vec!["grouper".to_string(), "errors/archive".to_string()]
        );
        assert_eq!(broker.published()[0].queue, "errors/archive");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sends_all_arrive() {
        let broker = MemoryBroker::new();
        let publisher = Arc::new(publisher(&broker, "grouper"));
        let sends = (0..4).map(|n| {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.send(format!("{{\"n\":{}}}", n).as_bytes()).await })
        });
        for send in futures::future::join_all(sends).await {
            send.unwrap().unwrap();
        }
        assert_eq!(broker.published().len(), 4);
        assert_eq!(broker.connect_attempts().len(), 1);
    }

    #[tokio::test]
    async fn empty_default_queue_is_a_no_op() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker, "");
        publisher.send(b"{}").await.unwrap();
        assert!(broker.connect_attempts().is_empty());
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker, "grouper");
        publisher.connect().await.unwrap();
        publisher.close().await.unwrap();
        publisher.close().await.unwrap();
        assert_eq!(broker.session_closes(), 1);
    }
}
