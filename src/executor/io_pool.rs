use super::panic_handler::PanicHandler;
use super::task::Task;
use super::thread_factory::ThreadFactory;
use super::Executor;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Unbounded pool for blocking work.
///
/// Submissions are handed straight to an idle worker over a zero-capacity
/// channel; if no worker is waiting, a new one is started with the task.
/// Nothing ever queues. Workers exit after `io_keep_alive` without work.
pub struct IoPool {
    inner: Arc<Inner>,
}

struct Inner {
    keep_alive: Duration,
    factory: Arc<ThreadFactory>,
    panic_handler: PanicHandler,
    // None once shut down
    handoff: RwLock<Option<Sender<Task>>>,
    idle: Receiver<Task>,
    state: Mutex<IoState>,
    terminated: Condvar,
    completed: AtomicU64,
    // workers parked on the handoff
    parked: AtomicUsize,
}

#[derive(Default)]
struct IoState {
    workers: usize,
    largest: usize,
}

impl IoPool {
    pub fn new(config: &PoolConfig, factory: Arc<ThreadFactory>) -> Self {
        let (handoff, idle) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                keep_alive: config.io_keep_alive,
                factory,
                panic_handler: PanicHandler::new(config.panic_strategy),
                handoff: RwLock::new(Some(handoff)),
                idle,
                state: Mutex::new(IoState::default()),
                terminated: Condvar::new(),
                completed: AtomicU64::new(0),
                parked: AtomicUsize::new(0),
            }),
        }
    }

    pub fn with_config(config: &PoolConfig) -> Self {
        let factory = Arc::new(ThreadFactory::new(config.thread_name_prefix.clone()));
        Self::new(config, factory)
    }

    pub fn keep_alive(&self) -> Duration {
        self.inner.keep_alive
    }

    pub fn pool_size(&self) -> usize {
        self.inner.state.lock().workers
    }

    pub fn largest_pool_size(&self) -> usize {
        self.inner.state.lock().largest
    }

    /// Workers currently waiting on the handoff for their next task.
    pub fn idle_workers(&self) -> usize {
        self.inner.parked.load(Ordering::Acquire)
    }

    pub fn completed_tasks(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    pub fn thread_factory(&self) -> &Arc<ThreadFactory> {
        &self.inner.factory
    }

    /// Stops accepting tasks; idle workers exit right away, busy ones once
    /// their current task is done.
    pub fn shutdown(&self) {
        if self.inner.handoff.write().take().is_some() {
            tracing::debug!("io pool shutting down");
        }
        let state = self.inner.state.lock();
        if state.workers == 0 {
            self.inner.terminated.notify_all();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.handoff.read().is_none()
    }

    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.pool_size() == 0
    }

    pub fn await_termination(&self, timeout: Duration) -> bool {
        if !self.is_shutdown() {
            return false;
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.workers > 0 {
            if self
                .inner
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.workers == 0;
            }
        }
        true
    }

    fn spawn_worker(&self, task: Task) -> Result<()> {
        let mut state = self.inner.state.lock();
        let inner = self.inner.clone();
        self.inner.factory.spawn(move || inner.work_loop(task))?;
        state.workers += 1;
        state.largest = state.largest.max(state.workers);
        Ok(())
    }
}

impl Executor for IoPool {
    fn submit(&self, task: Task) -> Result<()> {
        // Held across the spawn so shutdown cannot slip in between.
        let handoff = self.inner.handoff.read();
        let Some(sender) = handoff.as_ref() else {
            tracing::warn!(task = task.id().as_u64(), "io pool is shut down");
            return Err(Error::rejected("io pool is shut down"));
        };

        match sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => self.spawn_worker(task),
            Err(TrySendError::Disconnected(_)) => Err(Error::rejected("io handoff closed")),
        }
    }
}

impl Inner {
    fn work_loop(self: Arc<Self>, first: Task) {
        tracing::debug!("io worker started");
        self.run_task(first);

        loop {
            self.parked.fetch_add(1, Ordering::AcqRel);
            let next = self.idle.recv_timeout(self.keep_alive);
            self.parked.fetch_sub(1, Ordering::AcqRel);
            match next {
                Ok(task) => self.run_task(task),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut state = self.state.lock();
        state.workers -= 1;
        if state.workers == 0 {
            self.terminated.notify_all();
        }
        tracing::debug!("io worker exiting");
    }

    fn run_task(&self, task: Task) {
        self.panic_handler.run(task);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for IoPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for IoPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoPool")
            .field("keep_alive", &self.inner.keep_alive)
            .field("workers", &self.pool_size())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
