use super::task::Task;
use super::Executor;
use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Decides what happens to a task a pool refused to take.
pub trait RejectionHandler: Send + Sync + fmt::Debug {
    fn rejected(&self, task: Task, reason: &str) -> Result<()>;
}

/// Reports the rejection to the submitter.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortPolicy;

impl RejectionHandler for AbortPolicy {
    fn rejected(&self, task: Task, reason: &str) -> Result<()> {
        Err(Error::rejected(format!(
            "task {} rejected: {}",
            task.id().as_u64(),
            reason
        )))
    }
}

/// Hands rejected tasks to another executor. The target's own error is what
/// the submitter sees if it refuses too.
pub struct ForwardPolicy {
    target: Arc<dyn Executor>,
    label: &'static str,
}

impl ForwardPolicy {
    pub fn new(target: Arc<dyn Executor>, label: &'static str) -> Self {
        Self { target, label }
    }
}

impl fmt::Debug for ForwardPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardPolicy")
            .field("target", &self.label)
            .finish()
    }
}

impl RejectionHandler for ForwardPolicy {
    fn rejected(&self, task: Task, reason: &str) -> Result<()> {
        tracing::warn!(
            task = task.id().as_u64(),
            target = self.label,
            reason,
            pending_ms = task.submit_time().elapsed().as_millis() as u64,
            "forwarding rejected task"
        );
        self.target.submit(task)
    }
}
