//! Serialized message queue bound to a single thread.
//!
//! A [`Looper`] is prepared on the thread that will drain it; producers on any
//! thread post through cloneable [`LooperHandle`]s. Tasks run one at a time, in
//! the order their posts were accepted.

use super::panic_handler::{PanicHandler, PanicStrategy};
use super::task::Task;
use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::Arc;
use std::thread::{self, ThreadId};

enum Message {
    Run(Task),
    Quit,
}

#[derive(Debug)]
pub struct Looper {
    thread: ThreadId,
    receiver: Receiver<Message>,
    handle: LooperHandle,
    panic_handler: PanicHandler,
    // set once the quit message has been taken off the queue
    quit_seen: Cell<bool>,
}

#[derive(Debug, Clone)]
pub struct LooperHandle {
    thread: ThreadId,
    thread_name: Option<Arc<str>>,
    sender: Sender<Message>,
    panic_strategy: PanicStrategy,
    // Posts and quit are ordered through this lock so that nothing lands in
    // the queue behind the quit message.
    quitting: Arc<Mutex<bool>>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Run(task) => f.debug_tuple("Run").field(task).finish(),
            Message::Quit => f.write_str("Quit"),
        }
    }
}

impl Looper {
    /// Binds a new looper to the calling thread.
    pub fn prepare() -> Looper {
        Self::prepare_with(PanicStrategy::default())
    }

    /// Like [`Looper::prepare`], with `strategy` applied to panicking tasks.
    pub fn prepare_with(strategy: PanicStrategy) -> Looper {
        let current = thread::current();
        let (sender, receiver) = unbounded();
        let handle = LooperHandle {
            thread: current.id(),
            thread_name: current.name().map(Arc::from),
            sender,
            panic_strategy: strategy,
            quitting: Arc::new(Mutex::new(false)),
        };
        Looper {
            thread: current.id(),
            receiver,
            handle,
            panic_handler: PanicHandler::new(strategy),
            quit_seen: Cell::new(false),
        }
    }

    /// Starts a named thread that prepares a looper and runs it until quit.
    pub fn spawn<S: Into<String>>(name: S) -> Result<LooperHandle> {
        Self::spawn_with(name, PanicStrategy::default())
    }

    pub fn spawn_with<S: Into<String>>(name: S, strategy: PanicStrategy) -> Result<LooperHandle> {
        let (handle_tx, handle_rx) = crossbeam_channel::bounded(1);
        thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let looper = Looper::prepare_with(strategy);
                if handle_tx.send(looper.handle()).is_err() {
                    return;
                }
                if let Err(err) = looper.run() {
                    tracing::error!(%err, "looper stopped");
                }
            })
            .map_err(Error::ThreadSpawn)?;

        handle_rx
            .recv()
            .map_err(|_| Error::Other("looper thread exited before it was ready".into()))
    }

    pub fn handle(&self) -> LooperHandle {
        self.handle.clone()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// True once the quit message has been consumed by `run` or
    /// `run_pending`; the looper will not run anything after that.
    pub fn has_quit(&self) -> bool {
        self.quit_seen.get()
    }

    /// Drains the queue until [`LooperHandle::quit`] is called. Tasks posted
    /// before the quit still run. Returns at once if the quit was already
    /// consumed.
    pub fn run(&self) -> Result<()> {
        self.check_thread()?;
        if self.quit_seen.get() {
            return Ok(());
        }
        tracing::debug!(thread = ?self.handle.thread_name, "looper running");
        // The looper holds a sender through its own handle, so recv only ends
        // on a quit message.
        while let Ok(message) = self.receiver.recv() {
            match message {
                Message::Run(task) => {
                    self.panic_handler.run(task);
                }
                Message::Quit => {
                    self.quit_seen.set(true);
                    break;
                }
            }
        }
        tracing::debug!(thread = ?self.handle.thread_name, "looper quit");
        Ok(())
    }

    /// Runs whatever is queued right now and returns how many tasks ran. For
    /// hosts that pump the looper from their own event loop; check
    /// [`Looper::has_quit`] afterwards to know when to stop pumping.
    pub fn run_pending(&self) -> Result<usize> {
        self.check_thread()?;
        let mut ran = 0;
        if self.quit_seen.get() {
            return Ok(ran);
        }
        for message in self.receiver.try_iter() {
            match message {
                Message::Run(task) => {
                    self.panic_handler.run(task);
                    ran += 1;
                }
                Message::Quit => {
                    self.quit_seen.set(true);
                    break;
                }
            }
        }
        Ok(ran)
    }

    fn check_thread(&self) -> Result<()> {
        if thread::current().id() != self.thread {
            return Err(Error::WrongThread);
        }
        Ok(())
    }
}

impl LooperHandle {
    /// Queues a task. Never runs it inline, even on the bound thread.
    pub fn post(&self, task: Task) -> Result<()> {
        let quitting = self.quitting.lock();
        if *quitting {
            return Err(Error::rejected("looper has quit"));
        }
        self.sender
            .send(Message::Run(task))
            .map_err(|_| Error::rejected("looper is gone"))
    }

    /// Stops the looper once every task already posted has run.
    pub fn quit(&self) {
        let mut quitting = self.quitting.lock();
        if !*quitting {
            *quitting = true;
            let _ = self.sender.send(Message::Quit);
        }
    }

    pub fn has_quit(&self) -> bool {
        *self.quitting.lock()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// How the looper treats a panicking task.
    pub fn panic_strategy(&self) -> PanicStrategy {
        self.panic_strategy
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.thread
    }
}
