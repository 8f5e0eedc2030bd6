//! The user-facing client and its builder.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use secrecy::SecretString;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, normalize_base_url};
use crate::engine::{BasicAuthProvider, EngineClient, HttpEngineClient, RequestInterceptor};
use crate::error::ConfigError;
use crate::subscription::{SubscriptionBuilder, SubscriptionRegistry};
use crate::variables::{ObjectTypeRegistry, VariableValueCodec};
use crate::worker::{BackoffStrategy, Poller, PollerSettings, TaskDispatcher};

/// Polls the engine for external tasks and runs the subscribed handlers.
///
/// Cheap to clone; clones share the same subscriptions and poll loop. The
/// loop is cancelled when the last clone is dropped.
#[derive(Clone)]
pub struct ExternalTaskClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    worker_id: Arc<str>,
    base_url: String,
    lock_duration_ms: i64,
    shutdown_timeout: Option<Duration>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<TaskDispatcher>,
    poller: Arc<Poller>,
    running: Mutex<Option<RunningPoller>>,
}

struct RunningPoller {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.token.cancel();
        }
    }
}

impl ExternalTaskClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Start building a subscription for `topic_name`.
    pub fn subscribe(&self, topic_name: impl Into<String>) -> SubscriptionBuilder {
        SubscriptionBuilder::new(
            Arc::clone(&self.inner.registry),
            topic_name,
            self.inner.lock_duration_ms,
        )
    }

    /// Start polling. Does nothing if polling is already running.
    pub fn start(&self) -> Result<(), ConfigError> {
        let mut running = self.inner.running.lock();
        if running.is_some() {
            return Ok(());
        }
        tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let token = CancellationToken::new();
        let handle = Arc::clone(&self.inner.poller).spawn(token.clone());
        *running = Some(RunningPoller { token, handle });

        tracing::info!(
            worker_id = %self.inner.worker_id,
            base_url = %self.inner.base_url,
            "External task client started"
        );
        Ok(())
    }

    /// Stop polling and wait for running handlers, up to the shutdown timeout.
    ///
    /// Handlers still running after the timeout keep running detached.
    pub async fn stop(&self) {
        let running = self.inner.running.lock().take();
        let Some(running) = running else {
            return;
        };

        running.token.cancel();
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "Poller task ended abnormally");
        }

        if !self.inner.dispatcher.shutdown(self.inner.shutdown_timeout).await {
            tracing::warn!(
                active = self.inner.dispatcher.active_count(),
                "Shutdown timeout elapsed with handlers still running"
            );
        }

        tracing::info!(worker_id = %self.inner.worker_id, "External task client stopped");
    }

    pub fn is_active(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Handlers currently running.
    pub fn active_handlers(&self) -> usize {
        self.inner.dispatcher.active_count()
    }
}

impl std::fmt::Debug for ExternalTaskClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalTaskClient")
            .field("worker_id", &self.inner.worker_id)
            .field("base_url", &self.inner.base_url)
            .field("subscriptions", &self.inner.registry.len())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Builder for [`ExternalTaskClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    backoff: Option<Arc<dyn BackoffStrategy>>,
    object_types: ObjectTypeRegistry,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    engine: Option<Arc<dyn EngineClient>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::from_config(ClientConfig::default())
    }

    /// Start from an existing configuration, e.g. [`ClientConfig::from_env`].
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            backoff: None,
            object_types: ObjectTypeRegistry::new(),
            interceptors: Vec::new(),
            engine: None,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Fixed for the client's lifetime. Defaults to `<hostname>-<uuid>`.
    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.config.worker_id = Some(worker_id.into());
        self
    }

    pub fn max_tasks(mut self, max_tasks: usize) -> Self {
        self.config.max_tasks = max_tasks;
        self
    }

    pub fn worker_pool_size(mut self, pool_size: usize) -> Self {
        self.config.worker_pool_size = Some(pool_size);
        self
    }

    /// Default lock duration in milliseconds for new subscriptions.
    pub fn lock_duration(mut self, lock_duration_ms: i64) -> Self {
        self.config.lock_duration_ms = lock_duration_ms;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Enable long polling: the engine holds the fetch open up to `timeout`.
    pub fn async_response_timeout(mut self, timeout: Duration) -> Self {
        self.config.async_response_timeout = Some(timeout);
        self
    }

    pub fn use_priority(mut self, use_priority: bool) -> Self {
        self.config.use_priority = use_priority;
        self
    }

    pub fn backoff_strategy(mut self, backoff: impl BackoffStrategy + 'static) -> Self {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    /// `None` waits for running handlers indefinitely on stop.
    pub fn shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn auto_fetching(mut self, auto_fetching: bool) -> Self {
        self.config.auto_fetching = auto_fetching;
        self
    }

    /// Object types that variables may be converted from and to.
    pub fn object_types(mut self, object_types: ObjectTypeRegistry) -> Self {
        self.object_types = object_types;
        self
    }

    pub fn add_interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password);
        self
    }

    /// Use a custom engine transport instead of the HTTP one.
    pub fn engine_client(mut self, engine: Arc<dyn EngineClient>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Validate the settings and build the client.
    ///
    /// With auto fetching enabled (the default) polling starts right away,
    /// which needs a tokio runtime.
    pub fn build(self) -> Result<ExternalTaskClient, ConfigError> {
        let config = self.config;
        let base_url = normalize_base_url(&config.base_url)?;

        if config.max_tasks == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_tasks".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if config.lock_duration_ms <= 0 {
            return Err(ConfigError::InvalidLockDuration(config.lock_duration_ms));
        }

        let worker_id: Arc<str> = match config.worker_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Arc::from(id),
            _ => Arc::from(default_worker_id()),
        };

        let engine = match self.engine {
            Some(engine) => engine,
            None => {
                let mut interceptors = self.interceptors;
                if let (Some(username), Some(password)) = (&config.username, &config.password) {
                    interceptors.push(Arc::new(BasicAuthProvider::new(
                        username.clone(),
                        password.clone(),
                    )));
                }
                Arc::new(HttpEngineClient::new(base_url.clone(), interceptors)?)
            }
        };

        let codec = VariableValueCodec::new(Arc::new(self.object_types));
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = Arc::new(TaskDispatcher::new(
            Arc::clone(&engine),
            Arc::clone(&worker_id),
            codec.clone(),
            config.pool_size(),
        ));
        let poller = Arc::new(Poller::new(
            engine,
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            codec,
            self.backoff,
            PollerSettings {
                worker_id: Arc::clone(&worker_id),
                max_tasks: config.max_tasks,
                use_priority: config.use_priority,
                async_response_timeout: config.async_response_timeout,
                poll_interval: config.poll_interval,
            },
        ));

        let client = ExternalTaskClient {
            inner: Arc::new(ClientInner {
                worker_id,
                base_url,
                lock_duration_ms: config.lock_duration_ms,
                shutdown_timeout: config.shutdown_timeout,
                registry,
                dispatcher,
                poller,
                running: Mutex::new(None),
            }),
        };

        if config.auto_fetching {
            client.start()?;
        }
        Ok(client)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `<hostname>-<uuid>`.
fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "external-task-worker".to_string());
    format!("{host}-{}", uuid::Uuid::new_v4())
}
