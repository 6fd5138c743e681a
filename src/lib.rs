//! bus-executors - execution lanes for an event bus
//!
//! Three process-wide executors so callers never create ad-hoc threads:
//!
//! - **Compute**: fixed pool of `max(2, min(cpus - 1, 5))` threads over an
//!   unbounded FIFO queue. Idle threads time out after 5 seconds. Work it
//!   rejects after shutdown is forwarded to the I/O lane.
//! - **I/O**: elastic pool that hands each task to an idle thread or starts a
//!   new one. Meant for blocking calls.
//! - **Affinity**: serialized lane bound to a single thread (the host's main
//!   looper, or a dedicated thread).
//!
//! # Quick Start
//!
//! ```no_run
//! use bus_executors::prelude::*;
//!
//! bus_executors::compute_executor()
//!     .execute(|| println!("crunching"))
//!     .unwrap();
//!
//! bus_executors::io_executor()
//!     .execute(|| println!("blocking on a socket"))
//!     .unwrap();
//!
//! bus_executors::affinity_executor()
//!     .unwrap()
//!     .execute(|| println!("on the main looper"))
//!     .unwrap();
//! ```
//!
//! Threads are named `XBusPool-<pool>-Thread-<n>`, belong to the thread group
//! that was current when the registry was created, and always start
//! non-daemon at normal priority.

#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod executor;
pub mod prelude;
pub mod registry;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use error::{Error, Result};
pub use executor::{AffinityExecutor, ComputePool, Executor, IoPool, Task};
pub use registry::{affinity_executor, compute_executor, io_executor, ExecutorRegistry};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_all_lanes_run_work() {
        let registry = ExecutorRegistry::new(PoolConfig::default()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = crossbeam_channel::unbounded();

        let compute = registry.compute_executor();
        let io = registry.io_executor();
        let affinity = registry.affinity_executor().unwrap();

        for _ in 0..3 {
            let (c, t) = (counter.clone(), tx.clone());
            compute
                .execute(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    t.send(()).unwrap();
                })
                .unwrap();
            let (c, t) = (counter.clone(), tx.clone());
            io.execute(move || {
                c.fetch_add(1, Ordering::SeqCst);
                t.send(()).unwrap();
            })
            .unwrap();
            let (c, t) = (counter.clone(), tx.clone());
            affinity
                .execute(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    t.send(()).unwrap();
                })
                .unwrap();
        }

        for _ in 0..9 {
            rx.recv().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 9);
    }
}
