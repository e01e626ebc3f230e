//! Injected logger.
//!
//! A [`Logger`] wraps a `tracing::Span`. The binary builds one root logger at
//! start-up and hands clones to the consumer, the publisher and the worker;
//! the worker derives a per-message child for every handler invocation. Events
//! emitted through a logger are parented to its span, so they carry the span's
//! fields (service, queue, delivery tag) without a process-wide logger object.

use tracing::Span;

#[derive(Clone, Debug)]
pub struct Logger {
    span: Span,
}

impl Logger {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// Root logger for a worker process.
    pub fn root(service: &str, source_queue: &str) -> Self {
        Self::new(tracing::info_span!(
            "worker",
            service = %service,
            queue = %source_queue
        ))
    }

    /// Logger whose events go nowhere in particular; used where no process
    /// span exists, e.g. in tests.
    pub fn disabled() -> Self {
        Self::new(Span::none())
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Logger scoped to one component (consumer, publisher).
    pub fn component(&self, name: &'static str) -> Self {
        Self::new(tracing::info_span!(parent: &self.span, "component", name))
    }

    /// Logger scoped to a single delivery.
    pub fn for_delivery(&self, delivery_tag: u64) -> Self {
        Self::new(tracing::debug_span!(parent: &self.span, "task", delivery_tag))
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(parent: &self.span, "{}", message);
    }

    pub fn info(&self, message: &str) {
        tracing::info!(parent: &self.span, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(parent: &self.span, "{}", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(parent: &self.span, "{}", message);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::disabled()
    }
}
