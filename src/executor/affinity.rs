use super::looper::{Looper, LooperHandle};
use super::panic_handler::PanicStrategy;
use super::task::Task;
use super::Executor;
use crate::error::Result;
use std::thread::ThreadId;

/// Runs work on one bound thread, one task at a time, in submission order.
#[derive(Debug, Clone)]
pub struct AffinityExecutor {
    looper: LooperHandle,
}

impl AffinityExecutor {
    /// Binds to the thread that prepared `looper`.
    pub fn new(looper: LooperHandle) -> Self {
        Self { looper }
    }

    /// Binds to a freshly started thread named `name`.
    pub fn spawn_dedicated<S: Into<String>>(name: S) -> Result<Self> {
        Self::spawn_dedicated_with(name, PanicStrategy::default())
    }

    pub fn spawn_dedicated_with<S: Into<String>>(name: S, strategy: PanicStrategy) -> Result<Self> {
        Ok(Self::new(Looper::spawn_with(name, strategy)?))
    }

    pub fn looper(&self) -> &LooperHandle {
        &self.looper
    }

    pub fn bound_thread(&self) -> ThreadId {
        self.looper.thread_id()
    }

    pub fn is_bound_thread(&self) -> bool {
        self.looper.is_current_thread()
    }
}

impl Executor for AffinityExecutor {
    fn submit(&self, task: Task) -> Result<()> {
        self.looper.post(task)
    }
}
