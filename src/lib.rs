//! External task client: fetch, lock and work off external tasks of a process engine.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod subscription;
pub mod task;
pub mod variables;
pub mod worker;

pub use client::{ClientBuilder, ExternalTaskClient};
pub use config::ClientConfig;
pub use error::{ConfigError, EngineError, Error, RemoteError, Result, SerializationError, TypeError};
pub use subscription::{SubscriptionBuilder, SubscriptionHandle, SubscriptionState};
pub use task::{ExternalTask, ExternalTaskHandler, TaskService, handler_fn};
pub use variables::{
    ObjectTypeRegistry, ObjectValue, SerializationDataFormat, TypedValue, Value, ValueType,
    VariableMap,
};
pub use worker::{BackoffStrategy, ExponentialBackoff};
