use std::fmt;

use async_trait::async_trait;
use hawk_core::BrokerError;

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Reject without requeue.
    async fn reject(&self) -> Result<(), BrokerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Pending,
    Acknowledged,
    Rejected,
}

/// A delivery received from the broker.
///
/// A message leaves `Pending` exactly once. The transition is recorded before
/// the broker call is made, so a failed ack still counts as the message's one
/// disposition and cannot be followed by a reject.
pub struct Message {
    delivery_tag: u64,
    redelivered: bool,
    body: Vec<u8>,
    disposition: Disposition,
    acker: Box<dyn Acknowledger>,
}

impl Message {
    pub fn new(
        delivery_tag: u64,
        redelivered: bool,
        body: Vec<u8>,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            redelivered,
            body,
            disposition: Disposition::Pending,
            acker,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Whether the broker has delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    pub async fn ack(&mut self) -> Result<(), BrokerError> {
        self.settle(Disposition::Acknowledged)?;
        self.acker.ack().await
    }

    pub async fn reject(&mut self) -> Result<(), BrokerError> {
        self.settle(Disposition::Rejected)?;
        self.acker.reject().await
    }

    fn settle(&mut self, disposition: Disposition) -> Result<(), BrokerError> {
        if self.disposition != Disposition::Pending {
            return Err(BrokerError::AlreadySettled(self.delivery_tag));
        }
        self.disposition = disposition;
        Ok(())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .field("disposition", &self.disposition)
            .finish()
    }
}
