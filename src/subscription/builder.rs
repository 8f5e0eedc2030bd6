//! Fluent subscription setup and the handle returned once it is open.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::subscription::registry::{SubscriptionRegistry, TopicFilters, TopicSubscription};
use crate::task::ExternalTaskHandler;

/// Lifecycle of a topic subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Being configured; the poller does not see it yet.
    Building,
    /// In the registry and polled for.
    Open,
    /// Removed; the topic may be subscribed again.
    Closed,
}

/// Collects the settings of a subscription until [`open`](Self::open) is called.
#[must_use = "a subscription is only registered once `open()` is called"]
pub struct SubscriptionBuilder {
    registry: Arc<SubscriptionRegistry>,
    topic_name: String,
    lock_duration: i64,
    handler: Option<Arc<dyn ExternalTaskHandler>>,
    variable_names: Option<Vec<String>>,
    local_variables: bool,
    filters: TopicFilters,
}

impl SubscriptionBuilder {
    pub(crate) fn new(
        registry: Arc<SubscriptionRegistry>,
        topic_name: impl Into<String>,
        default_lock_duration: i64,
    ) -> Self {
        Self {
            registry,
            topic_name: topic_name.into(),
            lock_duration: default_lock_duration,
            handler: None,
            variable_names: None,
            local_variables: false,
            filters: TopicFilters::default(),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        SubscriptionState::Building
    }

    /// Lock duration in milliseconds. Must be greater than zero.
    pub fn lock_duration(mut self, lock_duration_ms: i64) -> Self {
        self.lock_duration = lock_duration_ms;
        self
    }

    pub fn handler(mut self, handler: impl ExternalTaskHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn handler_arc(mut self, handler: Arc<dyn ExternalTaskHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Only fetch these variables. Without a filter all variables are fetched.
    pub fn variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variable_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Only fetch these variables, read from the task's local scope.
    pub fn local_variable_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.local_variables = true;
        self.variables(names)
    }

    pub fn business_key(mut self, business_key: impl Into<String>) -> Self {
        self.filters.business_key = Some(business_key.into());
        self
    }

    pub fn process_definition_id(mut self, id: impl Into<String>) -> Self {
        self.filters.process_definition_id = Some(id.into());
        self
    }

    pub fn process_definition_id_in<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.process_definition_id_in = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn process_definition_key(mut self, key: impl Into<String>) -> Self {
        self.filters.process_definition_key = Some(key.into());
        self
    }

    pub fn process_definition_key_in<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.process_definition_key_in = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn process_definition_version_tag(mut self, tag: impl Into<String>) -> Self {
        self.filters.process_definition_version_tag = Some(tag.into());
        self
    }

    pub fn tenant_id_in<I, S>(mut self, tenant_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.tenant_id_in = Some(tenant_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn without_tenant_id(mut self) -> Self {
        self.filters.without_tenant_id = true;
        self
    }

    /// Only fetch tasks whose process has `name` equal to `value`.
    pub fn process_variable(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.filters
            .process_variables
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value);
        self
    }

    pub fn process_variables(mut self, variables: HashMap<String, serde_json::Value>) -> Self {
        self.filters
            .process_variables
            .get_or_insert_with(HashMap::new)
            .extend(variables);
        self
    }

    pub fn include_extension_properties(mut self, include: bool) -> Self {
        self.filters.include_extension_properties = include;
        self
    }

    /// Validate and register the subscription.
    pub fn open(self) -> Result<SubscriptionHandle, ConfigError> {
        if self.topic_name.trim().is_empty() {
            return Err(ConfigError::MissingTopic);
        }
        if self.lock_duration <= 0 {
            return Err(ConfigError::InvalidLockDuration(self.lock_duration));
        }
        let handler = self.handler.ok_or(ConfigError::MissingHandler)?;

        let id = self.registry.next_id();
        let subscription = TopicSubscription::new(
            id,
            self.topic_name.clone(),
            self.lock_duration,
            handler,
            self.variable_names,
            self.local_variables,
            self.filters,
        );
        self.registry.insert(subscription)?;

        tracing::info!(
            topic = %self.topic_name,
            lock_duration_ms = self.lock_duration,
            "Subscription opened"
        );

        Ok(SubscriptionHandle {
            id,
            topic_name: self.topic_name,
            registry: self.registry,
        })
    }
}

/// Handle to an open subscription.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: u64,
    topic_name: String,
    registry: Arc<SubscriptionRegistry>,
}

impl SubscriptionHandle {
    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn state(&self) -> SubscriptionState {
        if self.registry.contains(&self.topic_name, self.id) {
            SubscriptionState::Open
        } else {
            SubscriptionState::Closed
        }
    }

    /// Stop polling for this topic. Handlers already running are not interrupted.
    pub fn close(&self) {
        if self.registry.remove(&self.topic_name, self.id) {
            tracing::info!(topic = %self.topic_name, "Subscription closed");
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("topic_name", &self.topic_name)
            .field("state", &self.state())
            .finish()
    }
}
