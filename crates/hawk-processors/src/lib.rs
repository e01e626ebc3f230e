//! Hawk error-event processors.
//!
//! Business handlers that run on top of the worker core, the error-event
//! schema they read, and the wiring shared by their binaries.

pub mod event;
pub mod handlers;
pub mod runner;

pub use event::{BacktraceFrame, Event, EventPayload, SourceLine};
pub use handlers::{DefaultProcessor, GolangTransformer, Grouper};
