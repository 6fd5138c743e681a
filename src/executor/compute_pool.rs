use super::panic_handler::PanicHandler;
use super::rejection::{AbortPolicy, RejectionHandler};
use super::task::Task;
use super::thread_factory::ThreadFactory;
use super::Executor;
use crate::config::PoolConfig;
use crate::error::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fixed-size pool for CPU-bound work.
///
/// Up to `core_pool_size` workers are started on demand, each with the task
/// that caused it. Beyond that, tasks wait in an unbounded FIFO queue. Idle
/// workers, core ones included, exit after the keep-alive, so an idle pool
/// holds no threads. Once shut down, new tasks go to the rejection handler.
pub struct ComputePool {
    inner: Arc<Inner>,
}

struct Inner {
    core_pool_size: usize,
    max_pool_size: usize,
    keep_alive: Duration,
    factory: Arc<ThreadFactory>,
    rejection: Arc<dyn RejectionHandler>,
    panic_handler: PanicHandler,
    queue: Receiver<Task>,
    state: Mutex<PoolState>,
    terminated: Condvar,
    completed: AtomicU64,
}

struct PoolState {
    // None once shut down
    sender: Option<Sender<Task>>,
    workers: usize,
    largest: usize,
}

impl ComputePool {
    pub fn new(
        config: &PoolConfig,
        factory: Arc<ThreadFactory>,
        rejection: Arc<dyn RejectionHandler>,
    ) -> Self {
        let (sender, queue) = unbounded();
        Self {
            inner: Arc::new(Inner {
                core_pool_size: config.core_pool_size,
                max_pool_size: config.max_pool_size,
                keep_alive: config.keep_alive,
                factory,
                rejection,
                panic_handler: PanicHandler::new(config.panic_strategy),
                queue,
                state: Mutex::new(PoolState {
                    sender: Some(sender),
                    workers: 0,
                    largest: 0,
                }),
                terminated: Condvar::new(),
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Standalone pool with its own factory that reports rejections to the
    /// submitter.
    pub fn with_config(config: &PoolConfig) -> Self {
        let factory = Arc::new(ThreadFactory::new(config.thread_name_prefix.clone()));
        Self::new(config, factory, Arc::new(AbortPolicy))
    }

    pub fn core_pool_size(&self) -> usize {
        self.inner.core_pool_size
    }

    pub fn max_pool_size(&self) -> usize {
        self.inner.max_pool_size
    }

    pub fn keep_alive(&self) -> Duration {
        self.inner.keep_alive
    }

    /// Live worker threads.
    pub fn pool_size(&self) -> usize {
        self.inner.state.lock().workers
    }

    pub fn largest_pool_size(&self) -> usize {
        self.inner.state.lock().largest
    }

    pub fn queued_tasks(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn completed_tasks(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    pub fn thread_factory(&self) -> &Arc<ThreadFactory> {
        &self.inner.factory
    }

    /// Stops accepting tasks. Already queued tasks still run.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if state.sender.take().is_some() {
            tracing::debug!(workers = state.workers, "compute pool shutting down");
        }
        if state.workers == 0 {
            self.inner.terminated.notify_all();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().sender.is_none()
    }

    pub fn is_terminated(&self) -> bool {
        let state = self.inner.state.lock();
        state.sender.is_none() && state.workers == 0
    }

    /// Waits for all workers to exit after a shutdown. Returns whether the
    /// pool terminated within `timeout`.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !(state.sender.is_none() && state.workers == 0) {
            if self
                .inner
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.sender.is_none() && state.workers == 0;
            }
        }
        true
    }

    fn reject(&self, task: Task, reason: &str) -> Result<()> {
        self.inner.rejection.rejected(task, reason)
    }
}

impl Executor for ComputePool {
    fn submit(&self, task: Task) -> Result<()> {
        let mut state = self.inner.state.lock();
        let Some(sender) = state.sender.as_ref() else {
            drop(state);
            return self.reject(task, "compute pool is shut down");
        };

        if state.workers < self.inner.core_pool_size {
            // Spawn while holding the lock so no task is queued behind a
            // worker that then fails to start.
            let inner = self.inner.clone();
            self.inner
                .factory
                .spawn(move || inner.work_loop(task))?;
            state.workers += 1;
            state.largest = state.largest.max(state.workers);
            return Ok(());
        }

        // The queue is unbounded and we own a receiver, so this only fails if
        // the channel itself is gone.
        if let Err(err) = sender.send(task) {
            drop(state);
            return self.reject(err.into_inner(), "compute queue closed");
        }
        Ok(())
    }
}

impl Inner {
    fn work_loop(self: Arc<Self>, first: Task) {
        tracing::debug!("compute worker started");
        self.run_task(first);

        loop {
            match self.queue.recv_timeout(self.keep_alive) {
                Ok(task) => self.run_task(task),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                    if self.try_retire() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("compute worker exiting");
    }

    fn run_task(&self, task: Task) {
        self.panic_handler.run(task);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    // Checked under the state lock: submitters only enqueue while holding it,
    // so an empty queue here cannot strand a task.
    fn try_retire(&self) -> bool {
        let mut state = self.state.lock();
        if !self.queue.is_empty() {
            return false;
        }
        state.workers -= 1;
        if state.workers == 0 && state.sender.is_none() {
            self.terminated.notify_all();
        }
        true
    }
}

impl Drop for ComputePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ComputePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ComputePool")
            .field("core_pool_size", &self.inner.core_pool_size)
            .field("max_pool_size", &self.inner.max_pool_size)
            .field("keep_alive", &self.inner.keep_alive)
            .field("workers", &state.workers)
            .field("queued", &self.inner.queue.len())
            .field("shutdown", &state.sender.is_none())
            .field("rejection", &self.inner.rejection)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::HashSet;

    fn pool(size: usize, keep_alive: Duration) -> ComputePool {
        let config = PoolConfig::builder()
            .pool_size(size)
            .keep_alive(keep_alive)
            .thread_name_prefix("compute-test")
            .build()
            .unwrap();
        ComputePool::with_config(&config)
    }

    #[test]
    fn test_runs_submitted_work() {
        let pool = pool(2, Duration::from_secs(5));
        let (tx, rx) = crossbeam_channel::unbounded();

        for i in 0..10 {
            let tx = tx.clone();
            pool.execute(move || tx.send(i).unwrap()).unwrap();
        }

        let mut got: Vec<i32> = (0..10).map(|_| rx.recv().unwrap()).collect();
        got.sort();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_never_grows_beyond_core_size() {
        let pool = pool(2, Duration::from_secs(5));
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        let names = Arc::new(Mutex::new(HashSet::new()));
        let (done_tx, done_rx) = crossbeam_channel::unbounded();

        for _ in 0..8 {
            let release_rx = release_rx.clone();
            let names = names.clone();
            let done_tx = done_tx.clone();
            pool.execute(move || {
                let _ = release_rx.recv();
                names
                    .lock()
                    .insert(std::thread::current().name().unwrap().to_string());
                done_tx.send(()).unwrap();
            })
            .unwrap();
        }

        assert_eq!(pool.pool_size(), 2);
        assert_eq!(pool.queued_tasks(), 6);

        drop(release_tx);
        for _ in 0..8 {
            done_rx.recv().unwrap();
        }
        assert_eq!(pool.largest_pool_size(), 2);
        assert!(names.lock().len() <= 2);
    }

    #[test]
    fn test_queued_work_runs_in_fifo_order() {
        let pool = pool(1, Duration::from_secs(5));
        let order = Arc::new(Mutex::new(Vec::new()));
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        pool.execute(move || {
            let _ = gate_rx.recv();
        })
        .unwrap();
        for i in 0..20 {
            let order = order.clone();
            pool.execute(move || order.lock().push(i)).unwrap();
        }
        pool.execute(move || done_tx.send(()).unwrap()).unwrap();

        drop(gate_tx);
        done_rx.recv().unwrap();
        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_idle_core_threads_time_out() {
        let pool = pool(2, Duration::from_millis(50));
        let (tx, rx) = crossbeam_channel::unbounded();
        for _ in 0..2 {
            let tx = tx.clone();
            pool.execute(move || tx.send(()).unwrap()).unwrap();
        }
        rx.recv().unwrap();
        rx.recv().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.pool_size() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.pool_size(), 0);

        // and regrows on demand
        let tx2 = tx.clone();
        pool.execute(move || tx2.send(()).unwrap()).unwrap();
        rx.recv().unwrap();
        assert_eq!(pool.largest_pool_size(), 2);
    }

    #[test]
    fn test_shutdown_rejects_with_abort_policy() {
        let pool = pool(2, Duration::from_secs(5));
        pool.shutdown();

        let err = pool.execute(|| {}).unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
        assert!(pool.is_shutdown());
        assert!(pool.await_termination(Duration::from_secs(1)));
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let pool = pool(1, Duration::from_secs(5));
        let counter = Arc::new(AtomicU64::new(0));
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);

        pool.execute(move || {
            let _ = gate_rx.recv();
        })
        .unwrap();
        for _ in 0..5 {
            let counter = counter.clone();
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        drop(gate_tx);
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert!(pool.is_terminated());
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_panicking_task_keeps_worker() {
        let pool = pool(1, Duration::from_secs(5));
        let (tx, rx) = crossbeam_channel::bounded(1);

        pool.execute(|| panic!("boom")).unwrap();
        pool.execute(move || tx.send(42).unwrap()).unwrap();

        assert_eq!(rx.recv().unwrap(), 42);
        assert_eq!(pool.largest_pool_size(), 1);
    }
}
