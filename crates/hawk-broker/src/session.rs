//! Broker seam.
//!
//! The connection manager never talks to a client library directly. It dials
//! through a [`Connector`], which returns a [`Session`] (one connection plus
//! one channel) and a one-shot closed signal that fires when the broker or the
//! network severs that connection.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use hawk_core::BrokerError;
use tokio_util::sync::CancellationToken;

use crate::message::Message;

/// Content type attached to every published message.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Stream of inbound deliveries for one subscription. It ends, or yields an
/// error, when the underlying channel goes away.
pub type DeliveryStream = BoxStream<'static, Result<Message, BrokerError>>;

/// A live connection/channel pair.
#[async_trait]
pub trait Session: Send + Sync {
    /// Declare `queue` as durable, non-exclusive, non-auto-delete. Idempotent.
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Limit the number of unacknowledged deliveries on this channel.
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError>;

    /// Start consuming `queue` with manual acknowledgement.
    async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, BrokerError>;

    /// Publish `payload` to `queue` through the default exchange, as a
    /// persistent JSON message.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Close channel and connection.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Result of a successful dial.
pub struct Connected {
    pub session: Arc<dyn Session>,
    /// Cancelled when the connection is severed by the broker or the network.
    pub closed: CancellationToken,
}

/// Dials the broker. Never retries; retrying is the caller's business.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connected, BrokerError>;
}
