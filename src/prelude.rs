pub use crate::config::{PoolConfig, PoolConfigBuilder};
pub use crate::error::{Error, Result};
pub use crate::executor::{
    AffinityExecutor, ComputePool, Executor, IoPool, Looper, LooperHandle, PanicStrategy, Task,
    ThreadAttributes, ThreadFactory, ThreadGroup, ThreadPriority,
};
pub use crate::registry::ExecutorRegistry;

pub use crate::{affinity_executor, compute_executor, io_executor};
