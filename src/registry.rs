//! Lazily constructed executors shared by everything in the process.
//!
//! An [`ExecutorRegistry`] owns one compute pool, one I/O pool and one
//! affinity executor, each built on first access and then handed out as the
//! same `Arc`. Applications can build their own registry and pass it around;
//! the free functions at the bottom go through a process-wide instance built
//! from [`PoolConfig::default`].

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::executor::{
    AffinityExecutor, ComputePool, ForwardPolicy, IoPool, LooperHandle, ThreadFactory,
};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

static GLOBAL_REGISTRY: OnceLock<ExecutorRegistry> = OnceLock::new();

#[derive(Debug)]
pub struct ExecutorRegistry {
    config: PoolConfig,
    factory: Arc<ThreadFactory>,
    io: OnceLock<Arc<IoPool>>,
    compute: OnceLock<Arc<ComputePool>>,
    affinity: Mutex<Option<AffinitySlot>>,
}

#[derive(Debug)]
struct AffinitySlot {
    executor: Arc<AffinityExecutor>,
    // set when the registry started the looper thread itself
    owned: bool,
}

impl ExecutorRegistry {
    /// The compute and I/O pools share one thread factory, created here.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: PoolConfig) -> Self {
        let factory = Arc::new(ThreadFactory::new(config.thread_name_prefix.clone()));
        Self {
            config,
            factory,
            io: OnceLock::new(),
            compute: OnceLock::new(),
            affinity: Mutex::new(None),
        }
    }

    pub fn global() -> &'static ExecutorRegistry {
        GLOBAL_REGISTRY.get_or_init(|| {
            let config = PoolConfig::default();
            tracing::debug!(
                core_pool_size = config.core_pool_size,
                keep_alive = ?config.keep_alive,
                "initializing executor registry"
            );
            // the fixed defaults always validate
            ExecutorRegistry::with_valid_config(config)
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn thread_factory(&self) -> &Arc<ThreadFactory> {
        &self.factory
    }

    pub fn io_executor(&self) -> Arc<IoPool> {
        self.io
            .get_or_init(|| Arc::new(IoPool::new(&self.config, self.factory.clone())))
            .clone()
    }

    /// The compute pool forwards anything it rejects to the I/O pool, which
    /// is therefore built first.
    pub fn compute_executor(&self) -> Arc<ComputePool> {
        self.compute
            .get_or_init(|| {
                let overflow = ForwardPolicy::new(self.io_executor(), "io");
                Arc::new(ComputePool::new(
                    &self.config,
                    self.factory.clone(),
                    Arc::new(overflow),
                ))
            })
            .clone()
    }

    /// Uses the looper installed with [`install_main_looper`], or starts a
    /// dedicated looper thread on first call.
    ///
    /// [`install_main_looper`]: ExecutorRegistry::install_main_looper
    pub fn affinity_executor(&self) -> Result<Arc<AffinityExecutor>> {
        let mut slot = self.affinity.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.executor.clone());
        }

        let executor = Arc::new(AffinityExecutor::spawn_dedicated_with(
            self.config.affinity_thread_name.clone(),
            self.config.panic_strategy,
        )?);
        tracing::debug!(thread = %self.config.affinity_thread_name, "started affinity looper");
        *slot = Some(AffinitySlot {
            executor: executor.clone(),
            owned: true,
        });
        Ok(executor)
    }

    /// Binds the affinity lane to the host's looper. Must happen before the
    /// first [`affinity_executor`] call.
    ///
    /// [`affinity_executor`]: ExecutorRegistry::affinity_executor
    pub fn install_main_looper(&self, looper: LooperHandle) -> Result<Arc<AffinityExecutor>> {
        let mut slot = self.affinity.lock();
        if slot.is_some() {
            return Err(Error::Other("affinity executor already initialized".into()));
        }
        let executor = Arc::new(AffinityExecutor::new(looper));
        *slot = Some(AffinitySlot {
            executor: executor.clone(),
            owned: false,
        });
        Ok(executor)
    }
}

impl Drop for ExecutorRegistry {
    fn drop(&mut self) {
        if let Some(slot) = self.affinity.get_mut().take() {
            if slot.owned {
                slot.executor.looper().quit();
            }
        }
    }
}

pub fn compute_executor() -> Arc<ComputePool> {
    ExecutorRegistry::global().compute_executor()
}

pub fn io_executor() -> Arc<IoPool> {
    ExecutorRegistry::global().io_executor()
}

pub fn affinity_executor() -> Result<Arc<AffinityExecutor>> {
    ExecutorRegistry::global().affinity_executor()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Executor, Looper, PanicStrategy};
    use std::thread;
    use std::time::Duration;

    fn registry() -> ExecutorRegistry {
        ExecutorRegistry::new(PoolConfig::builder().parallelism(4).build().unwrap()).unwrap()
    }

    #[test]
    fn test_accessors_return_same_instance() {
        let registry = registry();

        assert!(Arc::ptr_eq(&registry.io_executor(), &registry.io_executor()));
        assert!(Arc::ptr_eq(
            &registry.compute_executor(),
            &registry.compute_executor()
        ));
        assert!(Arc::ptr_eq(
            &registry.affinity_executor().unwrap(),
            &registry.affinity_executor().unwrap()
        ));
    }

    #[test]
    fn test_concurrent_first_access_builds_once() {
        let registry = Arc::new(registry());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    (
                        registry.compute_executor(),
                        registry.io_executor(),
                        registry.affinity_executor().unwrap(),
                    )
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for (compute, io, affinity) in &results[1..] {
            assert!(Arc::ptr_eq(compute, &results[0].0));
            assert!(Arc::ptr_eq(io, &results[0].1));
            assert!(Arc::ptr_eq(affinity, &results[0].2));
        }
    }

    #[test]
    fn test_pools_share_one_factory() {
        let registry = registry();
        let compute = registry.compute_executor();
        let io = registry.io_executor();

        assert!(Arc::ptr_eq(compute.thread_factory(), io.thread_factory()));
        assert_eq!(compute.core_pool_size(), 3);
        assert_eq!(compute.max_pool_size(), 3);
    }

    #[test]
    fn test_rejected_compute_work_runs_on_io_lane() {
        let registry = registry();
        let compute = registry.compute_executor();
        compute.shutdown();

        let (tx, rx) = crossbeam_channel::bounded(1);
        compute
            .execute(move || {
                tx.send(thread::current().name().map(str::to_string))
                    .unwrap()
            })
            .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with(&format!(
            "XBusPool-{}-Thread-",
            registry.thread_factory().pool_seq()
        )));
        assert_eq!(registry.io_executor().largest_pool_size(), 1);
    }

    #[test]
    fn test_rejection_surfaces_when_both_lanes_closed() {
        let registry = registry();
        let compute = registry.compute_executor();
        compute.shutdown();
        registry.io_executor().shutdown();

        let err = compute.execute(|| {}).unwrap_err();
        assert!(err.is_rejection());
    }

    #[test]
    fn test_install_main_looper() {
        let registry = registry();
        let looper = Looper::prepare();

        let installed = registry.install_main_looper(looper.handle()).unwrap();
        let fetched = registry.affinity_executor().unwrap();
        assert!(Arc::ptr_eq(&installed, &fetched));
        assert!(fetched.is_bound_thread());

        assert!(registry.install_main_looper(looper.handle()).is_err());
    }

    #[test]
    fn test_affinity_looper_uses_configured_panic_strategy() {
        let config = PoolConfig::builder()
            .panic_strategy(PanicStrategy::Abort)
            .affinity_thread_name("XBusMain-abort")
            .build()
            .unwrap();
        let registry = ExecutorRegistry::new(config).unwrap();

        let affinity = registry.affinity_executor().unwrap();
        assert_eq!(affinity.looper().panic_strategy(), PanicStrategy::Abort);
        assert_eq!(affinity.looper().thread_name(), Some("XBusMain-abort"));

        let default_registry = registry_default();
        let affinity = default_registry.affinity_executor().unwrap();
        assert_eq!(
            affinity.looper().panic_strategy(),
            PanicStrategy::LogAndContinue
        );
    }

    fn registry_default() -> ExecutorRegistry {
        ExecutorRegistry::new(PoolConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PoolConfig::default();
        config.core_pool_size = 0;
        assert!(matches!(
            ExecutorRegistry::new(config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_global_accessors_are_singletons() {
        assert!(Arc::ptr_eq(&compute_executor(), &compute_executor()));
        assert!(Arc::ptr_eq(&io_executor(), &io_executor()));
        assert!(Arc::ptr_eq(
            &affinity_executor().unwrap(),
            &affinity_executor().unwrap()
        ));
        assert!(std::ptr::eq(
            ExecutorRegistry::global(),
            ExecutorRegistry::global()
        ));
    }
}
