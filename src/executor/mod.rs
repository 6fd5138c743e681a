//! Task execution lanes.
//!
//! This module provides the three executors (compute, I/O and affinity),
//! the thread factory they share, and the rejection policies that connect
//! the compute lane to the I/O lane.

pub mod affinity;
pub mod compute_pool;
pub mod io_pool;
pub mod looper;
pub mod panic_handler;
pub mod rejection;
pub mod task;
pub mod thread_factory;

pub use affinity::AffinityExecutor;
pub use compute_pool::ComputePool;
pub use io_pool::IoPool;
pub use looper::{Looper, LooperHandle};
pub use panic_handler::{PanicHandler, PanicStrategy};
pub use rejection::{AbortPolicy, ForwardPolicy, RejectionHandler};
pub use task::{Task, TaskId};
pub use thread_factory::{ThreadAttributes, ThreadFactory, ThreadGroup, ThreadIdentity, ThreadPriority};

use crate::error::Result;
use std::sync::Arc;

/// Fire-and-forget submission. `submit` returns once the task is accepted;
/// it fails only when no lane accepted the task or a worker thread could
/// not be created.
pub trait Executor: Send + Sync {
    fn submit(&self, task: Task) -> Result<()>;

    fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
        Self: Sized,
    {
        self.submit(Task::new(f))
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn submit(&self, task: Task) -> Result<()> {
        (**self).submit(task)
    }
}
