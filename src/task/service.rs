//! Per-task handle used by handlers to report results back to the engine.

use std::sync::Arc;

use crate::engine::EngineClient;
use crate::engine::dto::{
    BpmnErrorRequest, CompleteRequest, ExtendLockRequest, FailureRequest, VariableDtoMap,
};
use crate::error::Error;
use crate::task::model::ExternalTask;
use crate::variables::{VariableMap, VariableValueCodec};

/// Handle bound to one locked task and the client's worker id.
///
/// Each method issues exactly one request to the engine. Remote failures come
/// back as the matching [`EngineError`](crate::error::EngineError) variant with
/// the engine's message unchanged.
#[derive(Clone)]
pub struct TaskService {
    task_id: String,
    worker_id: Arc<str>,
    engine: Arc<dyn EngineClient>,
    codec: VariableValueCodec,
}

impl TaskService {
    pub fn new(
        task_id: impl Into<String>,
        worker_id: Arc<str>,
        engine: Arc<dyn EngineClient>,
        codec: VariableValueCodec,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            worker_id,
            engine,
            codec,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Complete the task, sending the variables the handler wrote on it.
    pub async fn complete(&self, task: &ExternalTask) -> Result<(), Error> {
        self.complete_with(task, VariableMap::new(), VariableMap::new())
            .await
    }

    /// Complete the task with explicit process and local variables laid over
    /// the ones written on `task`.
    pub async fn complete_with(
        &self,
        task: &ExternalTask,
        variables: VariableMap,
        local_variables: VariableMap,
    ) -> Result<(), Error> {
        let mut merged = VariableMap::new();
        if task.id == self.task_id {
            merged.clone_from(task.local_variables());
        } else {
            tracing::warn!(
                task_id = %self.task_id,
                other = %task.id,
                "Completing with variables of a different task; they are ignored"
            );
        }
        merged.extend(variables);

        let request = CompleteRequest {
            worker_id: self.worker_id.to_string(),
            variables: self.encode(&merged)?,
            local_variables: self.encode(&local_variables)?,
        };
        self.engine.complete(&self.task_id, &request).await?;
        tracing::debug!(task_id = %self.task_id, "Task completed");
        Ok(())
    }

    /// Give the lock back so another worker can fetch the task.
    pub async fn unlock(&self) -> Result<(), Error> {
        self.engine.unlock(&self.task_id).await?;
        tracing::debug!(task_id = %self.task_id, "Task unlocked");
        Ok(())
    }

    /// Report a failure. Retry policy is up to the engine; values are forwarded as-is.
    pub async fn handle_failure(
        &self,
        error_message: &str,
        error_details: Option<&str>,
        retries: i32,
        retry_timeout_ms: i64,
    ) -> Result<(), Error> {
        self.handle_failure_with(
            error_message,
            error_details,
            retries,
            retry_timeout_ms,
            VariableMap::new(),
            VariableMap::new(),
        )
        .await
    }

    pub async fn handle_failure_with(
        &self,
        error_message: &str,
        error_details: Option<&str>,
        retries: i32,
        retry_timeout_ms: i64,
        variables: VariableMap,
        local_variables: VariableMap,
    ) -> Result<(), Error> {
        let request = FailureRequest {
            worker_id: self.worker_id.to_string(),
            error_message: Some(error_message.to_string()),
            error_details: error_details.map(str::to_string),
            retries,
            retry_timeout: retry_timeout_ms,
            variables: self.encode(&variables)?,
            local_variables: self.encode(&local_variables)?,
        };
        self.engine.failure(&self.task_id, &request).await?;
        tracing::debug!(task_id = %self.task_id, retries, "Task failure reported");
        Ok(())
    }

    /// Throw a BPMN error for the task.
    pub async fn handle_bpmn_error(&self, error_code: &str) -> Result<(), Error> {
        self.handle_bpmn_error_with(error_code, None, VariableMap::new())
            .await
    }

    pub async fn handle_bpmn_error_with(
        &self,
        error_code: &str,
        error_message: Option<&str>,
        variables: VariableMap,
    ) -> Result<(), Error> {
        let request = BpmnErrorRequest {
            worker_id: self.worker_id.to_string(),
            error_code: error_code.to_string(),
            error_message: error_message.map(str::to_string),
            variables: self.encode(&variables)?,
        };
        self.engine.bpmn_error(&self.task_id, &request).await?;
        tracing::debug!(task_id = %self.task_id, error_code, "BPMN error reported");
        Ok(())
    }

    /// Extend the lock to `new_duration_ms` from now.
    pub async fn extend_lock(&self, new_duration_ms: i64) -> Result<(), Error> {
        let request = ExtendLockRequest {
            worker_id: self.worker_id.to_string(),
            new_duration: new_duration_ms,
        };
        self.engine.extend_lock(&self.task_id, &request).await?;
        tracing::debug!(task_id = %self.task_id, new_duration_ms, "Lock extended");
        Ok(())
    }

    fn encode(&self, variables: &VariableMap) -> Result<VariableDtoMap, Error> {
        self.codec.encode_map(variables)
    }
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService")
            .field("task_id", &self.task_id)
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}
