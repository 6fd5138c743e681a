//! Unit of work submitted to an executor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global task ID counter
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// A boxed `FnOnce` closure plus bookkeeping. Tasks move between lanes
/// intact, so a forwarded task keeps its id.
pub struct Task {
    id: TaskId,
    func: Box<dyn FnOnce() + Send + 'static>,
    submit_time: Instant,
}

impl Task {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            id: TaskId::next(),
            func: Box::new(f),
            submit_time: Instant::now(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn submit_time(&self) -> Instant {
        self.submit_time
    }

    /// Execute the task
    pub fn run(self) {
        (self.func)();
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("submit_time", &self.submit_time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_task_ids_increase() {
        let a = Task::new(|| {});
        let b = Task::new(|| {});
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_task_runs_closure() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        Task::new(move || flag.store(true, Ordering::SeqCst)).run();
        assert!(ran.load(Ordering::SeqCst));
    }
}
