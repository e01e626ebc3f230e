//! Queue consumer.
//!
//! [`QueueConsumer::receive`] keeps a subscription alive and forwards every
//! delivery into a bounded channel read by the worker. When the connection
//! drops it re-dials through a fresh [`ExponentialBackoff`] sequence and gives
//! up with [`BrokerError::BackoffExhausted`] once the sequence runs out.

use futures::StreamExt;
use hawk_core::{BrokerError, Logger};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::connection::ConnectionManager;
use crate::message::Message;
use crate::session::DeliveryStream;

/// Deliveries buffered between the consumer and the worker loop.
const DELIVERY_BUFFER: usize = 8;

const DEFAULT_PREFETCH: u16 = 1;

pub struct QueueConsumer {
    connection: ConnectionManager,
    queue: String,
    prefetch: u16,
    backoff: BackoffConfig,
    deliveries: mpsc::Sender<Message>,
    logger: Logger,
}

impl QueueConsumer {
    /// Create a consumer for `queue` and the receiving end of its delivery
    /// channel.
    pub fn new(
        connection: ConnectionManager,
        queue: impl Into<String>,
        logger: Logger,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (deliveries, rx) = mpsc::channel(DELIVERY_BUFFER);
        let consumer = Self {
            connection,
            queue: queue.into(),
            prefetch: DEFAULT_PREFETCH,
            backoff: BackoffConfig::consumer_reconnect(),
            deliveries,
            logger,
        };
        (consumer, rx)
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Dial the broker, apply the prefetch limit and declare the source queue.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.connection.connect().await?;
        let session = self.connection.session().await?;
        session.set_prefetch(self.prefetch).await?;
        session.declare_queue(&self.queue).await
    }

    /// Start consuming `queue` in manual-acknowledgement mode.
    pub async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let session = self.connection.session().await?;
        session.subscribe(queue).await
    }

    /// Stream deliveries into the channel until `cancel` fires (returns `Ok`)
    /// or reconnection is exhausted (returns the exhaustion error).
    pub async fn receive(&self, cancel: CancellationToken) -> Result<(), BrokerError> {
        self.receive_loop(cancel)
            .instrument(self.logger.span().clone())
            .await
    }

    pub async fn close(&self) -> Result<(), BrokerError> {
        self.connection.close().await
    }

    async fn receive_loop(&self, cancel: CancellationToken) -> Result<(), BrokerError> {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            opened = self.open() => opened,
        };
        let mut current = match opened {
            Ok(stream) => {
                tracing::info!(queue = %self.queue, "Subscribed to queue");
                Some(stream)
            }
            Err(e) => {
                tracing::warn!(queue = %self.queue, error = %e, "Initial subscription failed");
                None
            }
        };

        loop {
            let stream = match current.take() {
                Some(stream) => stream,
                None => match self.resubscribe(&cancel).await? {
                    Some(stream) => stream,
                    None => return Ok(()),
                },
            };

            if !self.stream(stream, &cancel).await {
                return Ok(());
            }
            self.connection.disconnect().await;
        }
    }

    /// Forward deliveries until the subscription breaks. Returns `false` when
    /// receiving should stop altogether.
    async fn stream(&self, mut stream: DeliveryStream, cancel: &CancellationToken) -> bool {
        let closed = self.connection.notify_closed().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = closed.cancelled() => {
                    tracing::warn!(queue = %self.queue, "Broker connection lost");
                    return true;
                }
                next = stream.next() => match next {
                    Some(Ok(message)) => {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return false,
                            sent = self.deliveries.send(message) => {
                                if sent.is_err() {
                                    tracing::debug!("Delivery channel closed");
                                    return false;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(queue = %self.queue, error = %e, "Delivery stream failed");
                        return true;
                    }
                    None => {
                        tracing::warn!(queue = %self.queue, "Delivery stream ended");
                        return true;
                    }
                },
            }
        }
    }

    /// Retry connect+subscribe after each backoff delay. `Ok(None)` means
    /// `cancel` fired while waiting or dialing.
    async fn resubscribe(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<DeliveryStream>, BrokerError> {
        let mut backoff: ExponentialBackoff = self.backoff.start();

        loop {
            let Some(delay) = backoff.next_delay() else {
                let err = backoff.exhausted("reconnecting");
                tracing::error!(queue = %self.queue, error = %err, "Giving up on broker");
                return Err(err);
            };

            tracing::debug!(
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to broker"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }

            let opened = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                opened = self.open() => opened,
            };
            match opened {
                Ok(stream) => {
                    tracing::info!(
                        queue = %self.queue,
                        attempt = backoff.attempts(),
                        "Resubscribed to queue"
                    );
                    return Ok(Some(stream));
                }
                Err(e) => {
                    tracing::warn!(
                        queue = %self.queue,
                        attempt = backoff.attempts(),
                        error = %e,
                        "Reconnect attempt failed"
                    );
                }
            }
        }
    }

    async fn open(&self) -> Result<DeliveryStream, BrokerError> {
        self.connect().await?;
        self.subscribe(&self.queue).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use crate::session::{Connected, Connector};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    const QUEUE: &str = "errors/default";

    /// A dial that never completes, like an unreachable host before the TCP
    /// timeout.
    struct HangingConnector;

    #[async_trait]
    impl Connector for HangingConnector {
        async fn connect(&self) -> Result<Connected, BrokerError> {
            std::future::pending::<Result<Connected, BrokerError>>().await
        }
    }

    fn consumer(broker: &MemoryBroker) -> (Arc<QueueConsumer>, mpsc::Receiver<Message>) {
        let connection = ConnectionManager::new("consumer", Arc::new(broker.connector()));
        let (consumer, rx) = QueueConsumer::new(connection, QUEUE, Logger::disabled());
        (Arc::new(consumer.with_prefetch(4)), rx)
    }

    fn spawn_receive(
        consumer: &Arc<QueueConsumer>,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<Result<(), BrokerError>> {
        let consumer = consumer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { consumer.receive(cancel).await })
    }

    async fn wait_for_subscriber(broker: &MemoryBroker) {
        while !broker.has_subscriber(QUEUE) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn connect_declares_queue_and_sets_prefetch() {
        let broker = MemoryBroker::new();
        let (consumer, _rx) = consumer(&broker);
        consumer.connect().await.unwrap();
        assert_eq!(broker.declared_queues(), vec![QUEUE.to_string()]);
        assert_eq!(broker.prefetch(), Some(4));
    }

    #[tokio::test]
    async fn forwards_deliveries_in_order() {
        let broker = MemoryBroker::new();
        let first = broker.deliver(QUEUE, "{\"n\":1}");
        let (consumer, mut rx) = consumer(&broker);
        let cancel = CancellationToken::new();
        let handle = spawn_receive(&consumer, &cancel);

        let second = broker.deliver(QUEUE, "{\"n\":2}");
        assert_eq!(rx.recv().await.unwrap().delivery_tag(), first);
        let message = rx.recv().await.unwrap();
        assert_eq!(message.delivery_tag(), second);
        assert_eq!(message.body(), b"{\"n\":2}");

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribes_after_connection_drop() {
        let broker = MemoryBroker::new();
        let (consumer, mut rx) = consumer(&broker);
        let cancel = CancellationToken::new();
        let handle = spawn_receive(&consumer, &cancel);
        wait_for_subscriber(&broker).await;

        broker.fail_next_connects(2);
        let dropped_at = Instant::now();
        broker.sever();
        let tag = broker.deliver(QUEUE, "{}");

        let message = rx.recv().await.unwrap();
        assert_eq!(message.delivery_tag(), tag);
        // Failed at +1s and +3s, succeeded at +7s.
        let attempts = broker.connect_attempts();
        assert_eq!(attempts.len(), 4);
        assert_eq!(attempts[3] - dropped_at, Duration::from_secs(7));

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn initial_failure_falls_back_to_backoff() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(1);
        let (consumer, mut rx) = consumer(&broker);
        let started = Instant::now();
        let cancel = CancellationToken::new();
        let handle = spawn_receive(&consumer, &cancel);

        broker.deliver(QUEUE, "{}");
        rx.recv().await.unwrap();
        let attempts = broker.connect_attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0], started);
        assert_eq!(attempts[1] - started, Duration::from_secs(1));

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_minutes_of_failed_reconnects() {
        let broker = MemoryBroker::new();
        let (consumer, _rx) = consumer(&broker);
        let cancel = CancellationToken::new();
        let handle = spawn_receive(&consumer, &cancel);
        wait_for_subscriber(&broker).await;

        broker.refuse_connections(true);
        let dropped_at = Instant::now();
        broker.sever();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, BrokerError::BackoffExhausted { .. }));
        assert_eq!(Instant::now() - dropped_at, Duration::from_secs(181));

        let offsets: Vec<u64> = broker.connect_attempts()[1..]
            .iter()
            .map(|at| (*at - dropped_at).as_secs())
            .collect();
        assert_eq!(offsets, vec![1, 3, 7, 15, 31, 61, 91, 121, 151, 181]);
        let gaps: Vec<u64> = offsets.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, vec![2, 4, 8, 16, 30, 30, 30, 30, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_reconnect_loop_without_error() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(true);
        let (consumer, _rx) = consumer(&broker);
        let cancel = CancellationToken::new();
        let handle = spawn_receive(&consumer, &cancel);

        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let broker = MemoryBroker::new();
        let (consumer, _rx) = consumer(&broker);
        consumer.connect().await.unwrap();
        consumer.close().await.unwrap();
        consumer.close().await.unwrap();
        assert_eq!(broker.session_closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_a_hanging_dial() {
        let connection = ConnectionManager::new("consumer", Arc::new(HangingConnector));
        let (consumer, _rx) = QueueConsumer::new(connection, QUEUE, Logger::disabled());
        let consumer = Arc::new(consumer);
        let cancel = CancellationToken::new();
        let handle = spawn_receive(&consumer, &cancel);

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.expect("receive kept dialing after cancel").unwrap().is_ok());

        tokio::time::timeout(Duration::from_secs(1), consumer.close())
            .await
            .expect("close waited on the dial")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn channel_error_closes_connection_before_resubscribing() {
        let broker = MemoryBroker::new();
        let (consumer, mut rx) = consumer(&broker);
        let cancel = CancellationToken::new();
        let handle = spawn_receive(&consumer, &cancel);
        wait_for_subscriber(&broker).await;

        broker.fail_channels();
        let tag = broker.deliver(QUEUE, "{}");
        assert_eq!(rx.recv().await.unwrap().delivery_tag(), tag);

        assert_eq!(broker.connect_attempts().len(), 2);
        assert_eq!(broker.session_closes(), 1);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
