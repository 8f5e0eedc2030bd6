//! The fetch-and-lock loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::EngineClient;
use crate::engine::dto::FetchAndLockRequest;
use crate::subscription::SubscriptionRegistry;
use crate::task::ExternalTask;
use crate::variables::VariableValueCodec;
use crate::worker::backoff::BackoffStrategy;
use crate::worker::dispatcher::TaskDispatcher;

/// Settings the poller reads every cycle.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub worker_id: Arc<str>,
    pub max_tasks: usize,
    pub use_priority: bool,
    pub async_response_timeout: Option<Duration>,
    pub poll_interval: Duration,
}

/// What a single poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No open subscriptions.
    NoSubscriptions,
    /// Every handler slot is taken.
    PoolExhausted,
    /// The fetch failed; logged and retried next cycle.
    FetchFailed,
    Fetched { fetched: usize, dispatched: usize },
}

/// Fetches tasks for all open subscriptions and hands them to the dispatcher.
pub struct Poller {
    engine: Arc<dyn EngineClient>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<TaskDispatcher>,
    codec: VariableValueCodec,
    backoff: Option<Arc<dyn BackoffStrategy>>,
    settings: PollerSettings,
}

impl Poller {
    pub fn new(
        engine: Arc<dyn EngineClient>,
        registry: Arc<SubscriptionRegistry>,
        dispatcher: Arc<TaskDispatcher>,
        codec: VariableValueCodec,
        backoff: Option<Arc<dyn BackoffStrategy>>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            engine,
            registry,
            dispatcher,
            codec,
            backoff,
            settings,
        }
    }

    /// Spawn the loop on the current runtime.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    /// Poll until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        tracing::info!(worker_id = %self.settings.worker_id, "Poller started");

        loop {
            if token.is_cancelled() {
                break;
            }

            // A fetch in flight runs to completion: the engine has already
            // locked whatever it returns to this worker.
            let outcome = self.poll_once().await;

            let mut wait = self.settings.poll_interval;
            if let Some(backoff) = &self.backoff {
                if let CycleOutcome::Fetched { fetched, .. } = outcome {
                    backoff.reconfigure(fetched);
                }
                wait += backoff.backoff_time();
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::info!(worker_id = %self.settings.worker_id, "Poller stopped");
    }

    /// Run one fetch-and-dispatch cycle.
    pub async fn poll_once(&self) -> CycleOutcome {
        let subscriptions = self.registry.snapshot();
        if subscriptions.is_empty() {
            tracing::debug!("No open subscriptions, skipping cycle");
            return CycleOutcome::NoSubscriptions;
        }

        let free = self.dispatcher.available_slots();
        if free == 0 {
            tracing::debug!("Handler pool exhausted, skipping cycle");
            return CycleOutcome::PoolExhausted;
        }

        let request = FetchAndLockRequest {
            worker_id: self.settings.worker_id.to_string(),
            max_tasks: self.settings.max_tasks.min(free),
            use_priority: self.settings.use_priority,
            async_response_timeout: self
                .settings
                .async_response_timeout
                .map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
            topics: subscriptions.iter().map(|s| s.to_request()).collect(),
        };

        let tasks = match self.engine.fetch_and_lock(&request).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "Fetch and lock failed");
                return CycleOutcome::FetchFailed;
            }
        };

        let fetched = tasks.len();
        tracing::debug!(fetched, max_tasks = request.max_tasks, "Fetched tasks");

        let mut dispatched = 0;
        for dto in tasks {
            let task_id = dto.id.clone();
            let task = match ExternalTask::decode(dto, &self.codec) {
                Ok(task) => task,
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "Dropping undecodable task");
                    continue;
                }
            };

            let Some(subscription) = subscriptions
                .iter()
                .find(|s| s.topic_name() == task.topic_name)
            else {
                tracing::warn!(
                    task_id = %task.id,
                    topic = %task.topic_name,
                    "No subscription for fetched task, skipping"
                );
                continue;
            };

            if self
                .dispatcher
                .dispatch(task, Arc::clone(subscription.handler()))
                .await
            {
                dispatched += 1;
            }
        }

        CycleOutcome::Fetched {
            fetched,
            dispatched,
        }
    }
}
