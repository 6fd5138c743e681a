//! Thread creation for the pools.
//!
//! Every thread created by a [`ThreadFactory`] gets a unique name of the form
//! `<prefix>-<poolSeq>-Thread-<threadSeq>`, joins the thread group that was
//! current when the factory was built, and runs non-daemon at
//! [`ThreadPriority::Normal`] whatever attributes its creator had.

use crate::error::{Error, Result};
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

/// Process-wide pool sequence; one number per factory.
static POOL_SEQ: AtomicUsize = AtomicUsize::new(1);

static MAIN_GROUP: OnceLock<ThreadGroup> = OnceLock::new();

thread_local! {
    static ATTRIBUTES: Cell<ThreadAttributes> = Cell::new(ThreadAttributes::default());
    static GROUP: RefCell<Option<ThreadGroup>> = RefCell::new(None);
    static IDENTITY: RefCell<Option<ThreadIdentity>> = RefCell::new(None);
}

/// Logical scheduling priority of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ThreadPriority {
    Min,
    Low,
    #[default]
    Normal,
    High,
    Max,
}

/// Attributes a thread hands down to the threads it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadAttributes {
    /// A daemon thread does not keep the process alive.
    pub daemon: bool,
    pub priority: ThreadPriority,
}

impl ThreadAttributes {
    pub const NORMAL: ThreadAttributes = ThreadAttributes {
        daemon: false,
        priority: ThreadPriority::Normal,
    };

    /// Attributes of the calling thread.
    pub fn current() -> Self {
        ATTRIBUTES.with(Cell::get)
    }

    /// Changes the calling thread's attributes. Threads spawned afterwards
    /// from this thread inherit them.
    pub fn set_current(attrs: ThreadAttributes) {
        ATTRIBUTES.with(|cell| cell.set(attrs));
    }
}

/// Named set of threads with a live-member count.
#[derive(Debug, Clone)]
pub struct ThreadGroup {
    inner: Arc<GroupInner>,
}

#[derive(Debug)]
struct GroupInner {
    name: String,
    active: AtomicUsize,
}

impl ThreadGroup {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name: name.into(),
                active: AtomicUsize::new(0),
            }),
        }
    }

    /// The root group threads belong to unless they entered another one.
    pub fn main() -> ThreadGroup {
        MAIN_GROUP.get_or_init(|| ThreadGroup::new("main")).clone()
    }

    /// Group of the calling thread.
    pub fn current() -> ThreadGroup {
        GROUP
            .with(|g| g.borrow().clone())
            .unwrap_or_else(ThreadGroup::main)
    }

    /// Makes this the calling thread's group.
    pub fn enter(&self) {
        GROUP.with(|g| *g.borrow_mut() = Some(self.clone()));
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of factory threads in this group that are still alive.
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn same_group(&self, other: &ThreadGroup) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn admit(&self) -> Membership {
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        Membership {
            group: self.clone(),
        }
    }
}

struct Membership {
    group: ThreadGroup,
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.group.inner.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Identity of a thread produced by a [`ThreadFactory`].
#[derive(Debug, Clone)]
pub struct ThreadIdentity {
    pub name: String,
    pub pool_seq: usize,
    pub thread_seq: usize,
    pub group: ThreadGroup,
    pub attributes: ThreadAttributes,
}

/// Identity of the calling thread, if a factory created it.
pub fn current_identity() -> Option<ThreadIdentity> {
    IDENTITY.with(|id| id.borrow().clone())
}

#[derive(Debug)]
pub struct ThreadFactory {
    prefix: String,
    pool_seq: usize,
    thread_seq: AtomicUsize,
    group: ThreadGroup,
}

impl ThreadFactory {
    /// Builds a factory in the calling thread's group.
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Self::with_group(prefix, ThreadGroup::current())
    }

    pub fn with_group<S: Into<String>>(prefix: S, group: ThreadGroup) -> Self {
        Self {
            prefix: prefix.into(),
            pool_seq: POOL_SEQ.fetch_add(1, Ordering::Relaxed),
            thread_seq: AtomicUsize::new(1),
            group,
        }
    }

    pub fn pool_seq(&self) -> usize {
        self.pool_seq
    }

    pub fn group(&self) -> &ThreadGroup {
        &self.group
    }

    /// Number of threads this factory has tried to create so far.
    pub fn threads_created(&self) -> usize {
        self.thread_seq.load(Ordering::Relaxed) - 1
    }

    pub fn spawn<F>(&self, work: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let thread_seq = self.thread_seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}-Thread-{}", self.prefix, self.pool_seq, thread_seq);

        let inherited = ThreadAttributes::current();
        let group = self.group.clone();
        let membership = group.admit();
        let identity = ThreadIdentity {
            name: name.clone(),
            pool_seq: self.pool_seq,
            thread_seq,
            group,
            attributes: ThreadAttributes::NORMAL,
        };

        thread::Builder::new()
            .name(name)
            .spawn(move || {
                let _membership = membership;
                if inherited != ThreadAttributes::NORMAL {
                    tracing::debug!(
                        thread = %identity.name,
                        daemon = inherited.daemon,
                        priority = ?inherited.priority,
                        "normalizing inherited thread attributes"
                    );
                }
                ATTRIBUTES.with(|cell| cell.set(ThreadAttributes::NORMAL));
                GROUP.with(|g| *g.borrow_mut() = Some(identity.group.clone()));
                IDENTITY.with(|id| *id.borrow_mut() = Some(identity));

                #[cfg(target_os = "linux")]
                reset_os_priority();

                work();
            })
            .map_err(Error::ThreadSpawn)
    }
}

/// Puts the calling thread back at nice 0 if it inherited something else.
/// Raising priority needs privileges, so failure is only logged.
#[cfg(target_os = "linux")]
fn reset_os_priority() {
    unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        *libc::__errno_location() = 0;
        let nice = libc::getpriority(libc::PRIO_PROCESS, tid);
        if nice == -1 && *libc::__errno_location() != 0 {
            return;
        }
        if nice != 0 && libc::setpriority(libc::PRIO_PROCESS, tid, 0) != 0 {
            tracing::debug!(nice, "could not reset inherited nice value");
        }
    }
}
