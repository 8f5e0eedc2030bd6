//! Bounded handler pool.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use crate::engine::EngineClient;
use crate::task::{ExternalTask, ExternalTaskHandler, TaskService};
use crate::variables::VariableValueCodec;

/// Runs handlers on spawned tasks, at most `pool_size` at a time.
///
/// A task id is never handed to two handlers at once; a duplicate delivery
/// while the first invocation is still running is skipped.
pub struct TaskDispatcher {
    engine: Arc<dyn EngineClient>,
    worker_id: Arc<str>,
    codec: VariableValueCodec,
    pool_size: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Releases a task id from the in-flight set when the invocation ends.
struct InFlightGuard {
    task_id: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.task_id);
    }
}

impl TaskDispatcher {
    pub fn new(
        engine: Arc<dyn EngineClient>,
        worker_id: Arc<str>,
        codec: VariableValueCodec,
        pool_size: usize,
    ) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            engine,
            worker_id,
            codec,
            pool_size,
            permits: Arc::new(Semaphore::new(pool_size)),
            tracker: TaskTracker::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Handlers currently running.
    pub fn active_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Slots free for new tasks.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.in_flight.lock().contains(task_id)
    }

    /// Hand `task` to `handler`. Waits for a free slot, not for the handler.
    ///
    /// Returns `false` when the task was skipped.
    pub async fn dispatch(&self, task: ExternalTask, handler: Arc<dyn ExternalTaskHandler>) -> bool {
        if !self.in_flight.lock().insert(task.id.clone()) {
            tracing::warn!(
                task_id = %task.id,
                topic = %task.topic_name,
                "Task is already being handled, skipping"
            );
            return false;
        }
        let guard = InFlightGuard {
            task_id: task.id.clone(),
            in_flight: Arc::clone(&self.in_flight),
        };

        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            tracing::warn!(task_id = %task.id, "Handler pool is closed, skipping task");
            return false;
        };

        let service = TaskService::new(
            task.id.clone(),
            Arc::clone(&self.worker_id),
            Arc::clone(&self.engine),
            self.codec.clone(),
        );

        self.tracker.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            let task_id = task.id.clone();
            let topic = task.topic_name.clone();

            match AssertUnwindSafe(handler.execute(task, service))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {
                    tracing::debug!(task_id = %task_id, topic = %topic, "Handler finished");
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        task_id = %task_id,
                        topic = %topic,
                        error = %format!("{e:#}"),
                        "Handler failed"
                    );
                }
                Err(panic) => {
                    tracing::error!(
                        task_id = %task_id,
                        topic = %topic,
                        panic = %panic_message(panic.as_ref()),
                        "Handler panicked"
                    );
                }
            }
        });

        true
    }

    /// Wait for running handlers, at most `timeout`. Returns whether all finished.
    ///
    /// The pool accepts new work again afterwards.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> bool {
        self.tracker.close();
        let finished = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.tracker.wait())
                .await
                .is_ok(),
            None => {
                self.tracker.wait().await;
                true
            }
        };
        self.tracker.reopen();
        finished
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
