//! Registry of open topic subscriptions.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::engine::dto::TopicRequest;
use crate::error::ConfigError;
use crate::task::ExternalTaskHandler;

/// Optional fetch filters sent along with a topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicFilters {
    pub business_key: Option<String>,
    pub process_definition_id: Option<String>,
    pub process_definition_id_in: Option<Vec<String>>,
    pub process_definition_key: Option<String>,
    pub process_definition_key_in: Option<Vec<String>>,
    pub process_definition_version_tag: Option<String>,
    pub tenant_id_in: Option<Vec<String>>,
    pub without_tenant_id: bool,
    pub process_variables: Option<HashMap<String, serde_json::Value>>,
    pub include_extension_properties: bool,
}

/// An open subscription: a topic bound to its handler.
#[derive(Clone)]
pub struct TopicSubscription {
    id: u64,
    topic_name: String,
    lock_duration: i64,
    handler: Arc<dyn ExternalTaskHandler>,
    variable_names: Option<Vec<String>>,
    local_variables: bool,
    filters: TopicFilters,
}

impl TopicSubscription {
    pub(crate) fn new(
        id: u64,
        topic_name: String,
        lock_duration: i64,
        handler: Arc<dyn ExternalTaskHandler>,
        variable_names: Option<Vec<String>>,
        local_variables: bool,
        filters: TopicFilters,
    ) -> Self {
        Self {
            id,
            topic_name,
            lock_duration,
            handler,
            variable_names,
            local_variables,
            filters,
        }
    }

    /// Unique per registry; distinguishes a re-subscription from its predecessor.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn lock_duration(&self) -> i64 {
        self.lock_duration
    }

    pub fn handler(&self) -> &Arc<dyn ExternalTaskHandler> {
        &self.handler
    }

    pub fn variable_names(&self) -> Option<&[String]> {
        self.variable_names.as_deref()
    }

    pub fn local_variables(&self) -> bool {
        self.local_variables
    }

    pub fn filters(&self) -> &TopicFilters {
        &self.filters
    }

    /// The topic entry of a fetch request.
    pub fn to_request(&self) -> TopicRequest {
        let filters = self.filters.clone();
        TopicRequest {
            topic_name: self.topic_name.clone(),
            lock_duration: self.lock_duration,
            variable_names: self.variable_names.clone(),
            local_variables: self.local_variables,
            business_key: filters.business_key,
            process_definition_id: filters.process_definition_id,
            process_definition_id_in: filters.process_definition_id_in,
            process_definition_key: filters.process_definition_key,
            process_definition_key_in: filters.process_definition_key_in,
            process_definition_version_tag: filters.process_definition_version_tag,
            tenant_id_in: filters.tenant_id_in,
            without_tenant_id: filters.without_tenant_id,
            process_variables: filters.process_variables,
            include_extension_properties: filters.include_extension_properties,
            deserialize_values: false,
        }
    }
}

impl std::fmt::Debug for TopicSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicSubscription")
            .field("id", &self.id)
            .field("topic_name", &self.topic_name)
            .field("lock_duration", &self.lock_duration)
            .field("variable_names", &self.variable_names)
            .field("local_variables", &self.local_variables)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

/// Open subscriptions keyed by topic name, in subscription order.
///
/// Shared between subscriber code and the poller; the poller works from a
/// [`snapshot`](Self::snapshot) taken at the start of each cycle.
pub struct SubscriptionRegistry {
    subscriptions: RwLock<IndexMap<String, TopicSubscription>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(IndexMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Add a subscription. Fails if its topic is already open.
    pub fn insert(&self, subscription: TopicSubscription) -> Result<(), ConfigError> {
        let mut subscriptions = self.subscriptions.write();
        if subscriptions.contains_key(subscription.topic_name()) {
            return Err(ConfigError::DuplicateTopic {
                topic: subscription.topic_name.clone(),
            });
        }
        subscriptions.insert(subscription.topic_name.clone(), subscription);
        Ok(())
    }

    /// Remove the subscription for `topic_name` only if it is still the one with `id`.
    pub fn remove(&self, topic_name: &str, id: u64) -> bool {
        let mut subscriptions = self.subscriptions.write();
        match subscriptions.get(topic_name) {
            Some(existing) if existing.id == id => {
                subscriptions.shift_remove(topic_name);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, topic_name: &str, id: u64) -> bool {
        self.subscriptions
            .read()
            .get(topic_name)
            .is_some_and(|s| s.id == id)
    }

    pub fn get(&self, topic_name: &str) -> Option<TopicSubscription> {
        self.subscriptions.read().get(topic_name).cloned()
    }

    /// Owned copy of all open subscriptions.
    pub fn snapshot(&self) -> Vec<TopicSubscription> {
        self.subscriptions.read().values().cloned().collect()
    }

    pub fn topics(&self) -> Vec<String> {
        self.subscriptions.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
