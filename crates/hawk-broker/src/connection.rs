//! Connection lifecycle.
//!
//! [`ConnectionManager`] is the only owner of a connection/channel pair. The
//! consumer and the publisher each hold their own manager and reach the
//! session exclusively through its methods; the manager serialises access
//! with an async mutex.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;

use hawk_core::BrokerError;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::session::{Connector, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

struct Inner {
    state: ConnectionState,
    session: Option<Arc<dyn Session>>,
    /// Closed signal of the current connection.
    closed: CancellationToken,
    /// Cancelled when the current connection is replaced or closed by us, to
    /// stop its watcher.
    retired: CancellationToken,
    generation: u64,
}

impl Inner {
    /// Detach the current session and stop its watcher. The session is
    /// returned even after a closed signal: a channel error leaves the
    /// underlying connection open.
    fn release(&mut self) -> Option<Arc<dyn Session>> {
        self.retired.cancel();
        self.session.take()
    }
}

pub struct ConnectionManager {
    name: &'static str,
    connector: Arc<dyn Connector>,
    inner: Arc<Mutex<Inner>>,
}

impl ConnectionManager {
    /// `name` identifies the owner (e.g. "consumer") in logs.
    pub fn new(name: &'static str, connector: Arc<dyn Connector>) -> Self {
        let closed = CancellationToken::new();
        closed.cancel();
        Self {
            name,
            connector,
            inner: Arc::new(Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                session: None,
                closed,
                retired: CancellationToken::new(),
                generation: 0,
            })),
        }
    }

    /// Dial the broker and open a channel, replacing any previous session.
    ///
    /// The lock is not held while dialing, so `close` and `disconnect` never
    /// wait on a dial. A dial that finishes after the manager moved on is
    /// closed and reported as [`BrokerError::ConnectionClosed`].
    ///
    /// Failures are returned as-is; retrying is the caller's responsibility.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        let (generation, previous) = {
            let mut inner = self.inner.lock().await;
            if inner.state == ConnectionState::Closed {
                return Err(BrokerError::ConnectionClosed(format!(
                    "{} connection was closed",
                    self.name
                )));
            }
            let previous = inner.release();
            inner.state = ConnectionState::Connecting;
            inner.generation += 1;
            (inner.generation, previous)
        };

        if let Some(previous) = previous {
            self.close_quietly(previous, "Failed to close previous session")
                .await;
        }

        let dialed = self.connector.connect().await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.state != ConnectionState::Connecting {
            drop(inner);
            if let Ok(stale) = dialed {
                self.close_quietly(stale.session, "Failed to close stale session")
                    .await;
            }
            return Err(BrokerError::ConnectionClosed(format!(
                "{} connection was closed while dialing",
                self.name
            )));
        }

        match dialed {
            Ok(connected) => {
                let retired = CancellationToken::new();
                inner.session = Some(connected.session);
                inner.closed = connected.closed.clone();
                inner.retired = retired.clone();
                inner.state = ConnectionState::Connected;
                self.watch(generation, connected.closed, retired);
                tracing::debug!(connection = self.name, "Connected to broker");
                Ok(())
            }
            Err(e) => {
                inner.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// One-shot signal for the current connection. Already fired when there is
    /// no live connection.
    pub async fn notify_closed(&self) -> CancellationToken {
        self.inner.lock().await.closed.clone()
    }

    /// The live session, if any.
    pub async fn session(&self) -> Result<Arc<dyn Session>, BrokerError> {
        let inner = self.inner.lock().await;
        match (&inner.session, inner.state) {
            (Some(session), ConnectionState::Connected) if !inner.closed.is_cancelled() => {
                Ok(session.clone())
            }
            _ => Err(BrokerError::NotConnected),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.state == ConnectionState::Connected && !inner.closed.is_cancelled()
    }

    /// Drop the current session after a failure so the next use re-dials.
    pub async fn disconnect(&self) {
        let session = {
            let mut inner = self.inner.lock().await;
            if inner.state != ConnectionState::Closed {
                inner.state = ConnectionState::Disconnected;
            }
            inner.release()
        };
        if let Some(session) = session {
            self.close_quietly(session, "Failed to close session").await;
        }
    }

    /// Close channel and connection. Closing a closed or never-opened
    /// connection is a no-op. A dial in progress is abandoned.
    pub async fn close(&self) -> Result<(), BrokerError> {
        let session = {
            let mut inner = self.inner.lock().await;
            inner.state = ConnectionState::Closed;
            inner.release()
        };
        match session {
            Some(session) => {
                tracing::debug!(connection = self.name, "Closing broker connection");
                session.close().await
            }
            None => Ok(()),
        }
    }

    async fn close_quietly(&self, session: Arc<dyn Session>, message: &'static str) {
        if let Err(e) = session.close().await {
            tracing::debug!(connection = self.name, error = %e, "{}", message);
        }
    }

    /// Watch the closed signal of one connection generation. When it fires the
    /// session is retired and closed, since a channel error leaves the
    /// connection itself open.
    fn watch(&self, generation: u64, closed: CancellationToken, retired: CancellationToken) {
        let inner = Arc::clone(&self.inner);
        let name = self.name;
        tokio::spawn(async move {
            tokio::select! {
                _ = retired.cancelled() => {}
                _ = closed.cancelled() => {
                    let session = {
                        let mut inner = inner.lock().await;
                        if inner.generation != generation || inner.state != ConnectionState::Connected {
                            return;
                        }
                        inner.state = ConnectionState::Disconnected;
                        tracing::warn!(connection = name, "Broker connection closed");
                        inner.release()
                    };
                    if let Some(session) = session {
                        if let Err(e) = session.close().await {
                            tracing::debug!(connection = name, error = %e, "Failed to close retired session");
                        }
                    }
                }
            }
        });
    }
}
