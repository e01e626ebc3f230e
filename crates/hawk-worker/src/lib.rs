//! Hawk worker core: the handler contract and the dispatch loop that drives
//! it.

pub mod context;
pub mod dispatcher;

pub use context::{HandlerContext, TaskHandler};
pub use dispatcher::{Worker, WorkerState};
pub use hawk_core::{Logger, Task, WorkerError};
