//! In-memory broker.
//!
//! Implements [`Connector`], [`Session`] and [`Acknowledger`] against shared
//! in-process state so the consumer, the publisher and the worker loop can be
//! exercised without a running broker. Failure injection covers refused
//! dials, failing publishes, failing dispositions, broker-side severing and
//! channel-only errors.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use hawk_core::BrokerError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::message::{Acknowledger, Message};
use crate::session::{Connected, Connector, DeliveryStream, Session};

/// A message that reached a queue through `publish`. Published messages are
/// also enqueued, so a consumer of that queue receives them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub queue: String,
    pub payload: Vec<u8>,
}

struct Subscriber {
    session_id: u64,
    tx: UnboundedSender<Result<Message, BrokerError>>,
}

#[derive(Default)]
struct State {
    refuse_connections: bool,
    failing_connects: u32,
    failing_publishes: u32,
    fail_dispositions: bool,
    connect_attempts: Vec<Instant>,
    publish_attempts: Vec<Instant>,
    published: Vec<Published>,
    declared: Vec<String>,
    prefetch: Option<u16>,
    acks: Vec<u64>,
    rejects: Vec<u64>,
    session_closes: usize,
    next_tag: u64,
    next_session_id: u64,
    pending: HashMap<String, VecDeque<(u64, Vec<u8>)>>,
    subscribers: HashMap<String, Subscriber>,
    live: Vec<(u64, CancellationToken)>,
    /// Sessions whose connection the broker dropped; closing them is a no-op.
    severed: HashSet<u64>,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Put a message on `queue`. It goes to the active subscriber, or waits
    /// until someone subscribes. Returns the delivery tag.
    pub fn deliver(&self, queue: &str, body: impl Into<Vec<u8>>) -> u64 {
        let mut state = self.lock();
        enqueue(&mut state, &self.state, queue, body.into())
    }

    /// Sever every live connection, as a broker restart would.
    pub fn sever(&self) {
        let mut state = self.lock();
        let live: Vec<_> = state.live.drain(..).collect();
        for (id, closed) in live {
            state.severed.insert(id);
            closed.cancel();
        }
        state.subscribers.clear();
    }

    /// Fail every live channel while leaving the connections open, as a
    /// channel-level protocol error would. The client still has to close them.
    pub fn fail_channels(&self) {
        let mut state = self.lock();
        for (_, closed) in state.live.drain(..) {
            closed.cancel();
        }
        state.subscribers.clear();
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.lock().failing_connects = count;
    }

    pub fn fail_next_publishes(&self, count: u32) {
        self.lock().failing_publishes = count;
    }

    pub fn fail_dispositions(&self, fail: bool) {
        self.lock().fail_dispositions = fail;
    }

    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.lock().connect_attempts.clone()
    }

    pub fn publish_attempts(&self) -> Vec<Instant> {
        self.lock().publish_attempts.clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.lock().published.clone()
    }

    pub fn declared_queues(&self) -> Vec<String> {
        self.lock().declared.clone()
    }

    pub fn prefetch(&self) -> Option<u16> {
        self.lock().prefetch
    }

    pub fn acks(&self) -> Vec<u64> {
        self.lock().acks.clone()
    }

    pub fn rejects(&self) -> Vec<u64> {
        self.lock().rejects.clone()
    }

    /// Sessions the client closed while their connection was still up.
    pub fn session_closes(&self) -> usize {
        self.lock().session_closes
    }

    pub fn has_subscriber(&self, queue: &str) -> bool {
        self.lock()
            .subscribers
            .get(queue)
            .is_some_and(|subscriber| !subscriber.tx.is_closed())
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn enqueue(state: &mut State, shared: &Arc<Mutex<State>>, queue: &str, body: Vec<u8>) -> u64 {
    state.next_tag += 1;
    let tag = state.next_tag;

    if let Some(subscriber) = state.subscribers.get(queue) {
        if !subscriber.tx.is_closed() {
            let _ = subscriber
                .tx
                .unbounded_send(Ok(memory_message(shared, tag, body)));
            return tag;
        }
    }

    state
        .pending
        .entry(queue.to_string())
        .or_default()
        .push_back((tag, body));
    tag
}

fn memory_message(state: &Arc<Mutex<State>>, tag: u64, body: Vec<u8>) -> Message {
    let acker = MemoryAcker {
        state: Arc::clone(state),
        delivery_tag: tag,
    };
    Message::new(tag, false, body, Box::new(acker))
}

pub struct MemoryConnector {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Connected, BrokerError> {
        let mut state = lock(&self.state);
        state.connect_attempts.push(Instant::now());

        if state.refuse_connections {
            return Err(BrokerError::Connect("connection refused".to_string()));
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(BrokerError::Connect("connection refused".to_string()));
        }

        state.next_session_id += 1;
        let closed = CancellationToken::new();
        let id = state.next_session_id;
        state.live.push((id, closed.clone()));

        let session = MemorySession {
            id,
            state: Arc::clone(&self.state),
            closed: closed.clone(),
            shut: AtomicBool::new(false),
        };
        Ok(Connected {
            session: Arc::new(session),
            closed,
        })
    }
}

struct MemorySession {
    id: u64,
    state: Arc<Mutex<State>>,
    closed: CancellationToken,
    shut: AtomicBool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.is_cancelled() || self.shut.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed("session closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        if !state.declared.iter().any(|declared| declared == queue) {
            state.declared.push(queue.to_string());
        }
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        self.ensure_open()?;
        lock(&self.state).prefetch = Some(count);
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        self.ensure_open()?;
        let (tx, rx) = unbounded();
        let mut state = lock(&self.state);

        let pending = state.pending.remove(queue).unwrap_or_default();
        for (tag, body) in pending {
            let _ = tx.unbounded_send(Ok(memory_message(&self.state, tag, body)));
        }
        state.subscribers.insert(
            queue.to_string(),
            Subscriber {
                session_id: self.id,
                tx,
            },
        );
        Ok(rx.boxed())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        state.publish_attempts.push(Instant::now());
        if self.closed.is_cancelled() || self.shut.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish {
                queue: queue.to_string(),
                reason: "channel closed".to_string(),
            });
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(BrokerError::Publish {
                queue: queue.to_string(),
                reason: "channel closed".to_string(),
            });
        }
        state.published.push(Published {
            queue: queue.to_string(),
            payload: payload.to_vec(),
        });
        enqueue(&mut state, &self.state, queue, payload.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.shut.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = lock(&self.state);
        let id = self.id;
        state.live.retain(|(live, _)| *live != id);
        if state.severed.contains(&id) {
            return Ok(());
        }
        state.session_closes += 1;
        state
            .subscribers
            .retain(|_, subscriber| subscriber.session_id != id);
        Ok(())
    }
}

struct MemoryAcker {
    state: Arc<Mutex<State>>,
    delivery_tag: u64,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        if state.fail_dispositions {
            return Err(BrokerError::Disposition {
                delivery_tag: self.delivery_tag,
                reason: "channel closed".to_string(),
            });
        }
        state.acks.push(self.delivery_tag);
        Ok(())
    }

    async fn reject(&self) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        if state.fail_dispositions {
            return Err(BrokerError::Disposition {
                delivery_tag: self.delivery_tag,
                reason: "channel closed".to_string(),
            });
        }
        state.rejects.push(self.delivery_tag);
        Ok(())
    }
}
