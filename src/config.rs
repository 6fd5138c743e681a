use crate::error::{Error, Result};
use crate::executor::PanicStrategy;
use std::time::Duration;

/// Lower bound for the compute pool's core size.
pub const MIN_CORE_POOL_SIZE: usize = 2;
/// Upper bound for the compute pool's core size.
pub const MAX_CORE_POOL_SIZE: usize = 5;
pub const KEEP_ALIVE: Duration = Duration::from_secs(5);
pub const IO_KEEP_ALIVE: Duration = Duration::from_secs(60);
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "XBusPool";
pub const DEFAULT_AFFINITY_THREAD_NAME: &str = "XBusMain";

/// Core size for a given parallelism: one less than the CPU count, clamped
/// to `[MIN_CORE_POOL_SIZE, MAX_CORE_POOL_SIZE]`.
pub fn core_pool_size_for(parallelism: usize) -> usize {
    parallelism
        .saturating_sub(1)
        .min(MAX_CORE_POOL_SIZE)
        .max(MIN_CORE_POOL_SIZE)
}

pub fn detected_parallelism() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    pub keep_alive: Duration,
    pub io_keep_alive: Duration,
    pub thread_name_prefix: String,
    pub affinity_thread_name: String,
    pub panic_strategy: PanicStrategy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_parallelism(detected_parallelism())
    }
}

impl PoolConfig {
    pub fn for_parallelism(parallelism: usize) -> Self {
        let core = core_pool_size_for(parallelism);
        Self {
            core_pool_size: core,
            max_pool_size: core,
            keep_alive: KEEP_ALIVE,
            io_keep_alive: IO_KEEP_ALIVE,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            affinity_thread_name: DEFAULT_AFFINITY_THREAD_NAME.to_string(),
            panic_strategy: PanicStrategy::default(),
        }
    }

    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.core_pool_size == 0 {
            return Err(Error::config("core_pool_size must be > 0"));
        }
        // the compute pool never grows past its core size
        if self.max_pool_size != self.core_pool_size {
            return Err(Error::config("max_pool_size must equal core_pool_size"));
        }
        if self.keep_alive.is_zero() || self.io_keep_alive.is_zero() {
            return Err(Error::config("keep-alive durations must be non-zero"));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    /// Derive core and max size from a parallelism figure instead of the
    /// detected one.
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        let core = core_pool_size_for(parallelism);
        self.config.core_pool_size = core;
        self.config.max_pool_size = core;
        self
    }

    /// Sets both core and max size; the compute pool is non-elastic.
    pub fn pool_size(mut self, n: usize) -> Self {
        self.config.core_pool_size = n;
        self.config.max_pool_size = n;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    pub fn io_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.io_keep_alive = keep_alive;
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn affinity_thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.affinity_thread_name = name.into();
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
