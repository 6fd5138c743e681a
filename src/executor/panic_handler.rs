use super::task::Task;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicStrategy {
    Abort,
    #[default]
    LogAndContinue,
}

/// Runs tasks on worker threads so that a panicking task never takes the
/// worker down with it.
#[derive(Debug)]
pub struct PanicHandler {
    strategy: PanicStrategy,
    panic_count: AtomicUsize,
}

impl PanicHandler {
    pub fn new(strategy: PanicStrategy) -> Self {
        Self {
            strategy,
            panic_count: AtomicUsize::new(0),
        }
    }

    /// Returns false if the task panicked.
    pub fn run(&self, task: Task) -> bool {
        let id = task.id();
        match catch_unwind(AssertUnwindSafe(|| task.run())) {
            Ok(()) => true,
            Err(payload) => {
                self.panic_count.fetch_add(1, Ordering::Relaxed);
                let message = panic_message(payload.as_ref());
                let thread = std::thread::current();
                let thread_name = thread.name().unwrap_or("unnamed");

                match self.strategy {
                    PanicStrategy::Abort => {
                        tracing::error!(task = id.as_u64(), thread = thread_name, %message, "task panicked, aborting");
                        std::process::abort();
                    }
                    PanicStrategy::LogAndContinue => {
                        tracing::error!(task = id.as_u64(), thread = thread_name, %message, "task panicked");
                    }
                }
                false
            }
        }
    }

    pub fn panic_count(&self) -> usize {
        self.panic_count.load(Ordering::Relaxed)
    }

    pub fn strategy(&self) -> PanicStrategy {
        self.strategy
    }
}

impl Default for PanicHandler {
    fn default() -> Self {
        Self::new(PanicStrategy::default())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
