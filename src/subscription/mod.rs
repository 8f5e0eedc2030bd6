//! Topic subscriptions: building, the open-subscription registry and handles.

pub mod builder;
pub mod registry;

pub use builder::{SubscriptionBuilder, SubscriptionHandle, SubscriptionState};
pub use registry::{SubscriptionRegistry, TopicFilters, TopicSubscription};
