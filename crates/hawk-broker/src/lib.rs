//! Broker plumbing for Hawk workers.
//!
//! A [`ConnectionManager`] owns one connection/channel pair, dialled through a
//! [`Connector`]. [`QueueConsumer`] and [`QueuePublisher`] each sit on their
//! own manager and recover from dropped connections through
//! [`ExponentialBackoff`] sequences. [`AmqpConnector`] is the production
//! connector; the `memory` feature adds an in-process broker for tests.

pub mod amqp;
pub mod backoff;
pub mod connection;
pub mod consumer;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod message;
pub mod publisher;
pub mod session;

pub use amqp::AmqpConnector;
pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use connection::{ConnectionManager, ConnectionState};
pub use consumer::QueueConsumer;
pub use message::{Acknowledger, Disposition, Message};
pub use publisher::{Publisher, QueuePublisher};
pub use session::{Connected, Connector, DeliveryStream, Session, CONTENT_TYPE_JSON};
