//! Hawk Infrastructure Library
//!
//! Process-level plumbing shared by the worker binaries:
//! - Tracing subscriber initialization (compact console or JSON)
//! - OS shutdown signals wired to a cancellation token

pub mod shutdown;
pub mod telemetry;

pub use shutdown::{cancel_on_shutdown, shutdown_signal};
pub use telemetry::init_telemetry;
