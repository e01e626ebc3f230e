//! Hawk Core Library
//!
//! This crate provides the error taxonomy, the task model, the injected logger
//! and the environment configuration shared by the broker plumbing, the worker
//! loop and the processor binaries.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;

// Re-export commonly used types
pub use config::{LogFormat, WorkerConfig};
pub use error::{BrokerError, ErrorKind, ErrorMetadata, LogLevel, WorkerError};
pub use logging::Logger;
pub use models::Task;
