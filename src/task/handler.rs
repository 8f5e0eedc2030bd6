//! Handler trait invoked for every locked task.

use std::future::Future;

use async_trait::async_trait;

use crate::task::model::ExternalTask;
use crate::task::service::TaskService;

/// User code that works on a locked task.
///
/// An `Err` (or a panic) is logged by the dispatcher; the task then stays
/// locked on the engine until its lock expires.
#[async_trait]
pub trait ExternalTaskHandler: Send + Sync {
    async fn execute(&self, task: ExternalTask, service: TaskService) -> anyhow::Result<()>;
}

/// Handler built from an async closure. See [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as an [`ExternalTaskHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(ExternalTask, TaskService) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> ExternalTaskHandler for HandlerFn<F>
where
    F: Fn(ExternalTask, TaskService) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn execute(&self, task: ExternalTask, service: TaskService) -> anyhow::Result<()> {
        (self.f)(task, service).await
    }
}
