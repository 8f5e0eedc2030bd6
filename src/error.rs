//! Error types for the external task client.

/// Top-level error type for the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Type error: {0}")]
    Type(#[from] TypeError),
}

/// Configuration-related errors, raised synchronously at build or subscribe time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Topic name cannot be null")]
    MissingTopic,

    #[error("Lock duration is not greater than 0: {0}")]
    InvalidLockDuration(i64),

    #[error("Locked task handler cannot be null")]
    MissingHandler,

    #[error("Topic name has already been subscribed: {topic}")]
    DuplicateTopic { topic: String },

    #[error("Base URL cannot be null or an empty string")]
    MissingBaseUrl,

    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("No tokio runtime available to start polling")]
    NoRuntime,
}

/// Failure reported for a single remote call.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The engine answered with a non-2xx status.
    #[error("status code '{code}' - message: {message}")]
    Status { code: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// HTTP status code, when the engine answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// One variant per remote operation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Exception while fetching and locking task: {source}")]
    FetchAndLock { source: RemoteError },

    #[error("Exception while completing the external task '{task_id}': {source}")]
    CompleteTask { task_id: String, source: RemoteError },

    #[error("Exception while unlocking the external task '{task_id}': {source}")]
    UnlockTask { task_id: String, source: RemoteError },

    #[error("Exception while notifying a failure for the external task '{task_id}': {source}")]
    TaskFailure { task_id: String, source: RemoteError },

    #[error("Exception while notifying a BPMN error for the external task '{task_id}': {source}")]
    BpmnError { task_id: String, source: RemoteError },

    #[error("Exception while extending the lock of the external task '{task_id}': {source}")]
    ExtendLock { task_id: String, source: RemoteError },
}

impl EngineError {
    /// The wrapped remote failure.
    pub fn remote(&self) -> &RemoteError {
        match self {
            Self::FetchAndLock { source }
            | Self::CompleteTask { source, .. }
            | Self::UnlockTask { source, .. }
            | Self::TaskFailure { source, .. }
            | Self::BpmnError { source, .. }
            | Self::ExtendLock { source, .. } => source,
        }
    }
}

/// Value-level encode/decode errors.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Variable '{name}' has unknown value type '{value_type}'")]
    UnknownValueType { name: String, value_type: String },

    #[error("Variable '{name}' of type {value_type} has an invalid value: {reason}")]
    InvalidValue {
        name: String,
        value_type: String,
        reason: String,
    },

    #[error("Variable '{name}' is malformed for format {format}: {reason}")]
    MalformedPayload {
        name: String,
        format: String,
        reason: String,
    },

    #[error("Task '{task_id}' could not be decoded: {source}")]
    Task {
        task_id: String,
        #[source]
        source: Box<SerializationError>,
    },

    #[error("Object of type '{type_name}' could not be serialized as {format}: {reason}")]
    Object {
        type_name: String,
        format: String,
        reason: String,
    },
}

/// Variable typing errors, raised at the point a variable is set or read.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("Unsupported value type '{type_name}'")]
    UnsupportedType { type_name: String },

    #[error("Unknown object type '{type_name}'")]
    UnknownType { type_name: String },

    #[error("Variable '{name}' holds a {actual} value, not {expected}")]
    Mismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Object type '{type_name}' does not support format {format}")]
    UnsupportedFormat { type_name: String, format: String },
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, Error>;
