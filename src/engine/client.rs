//! Engine client: the six remote external-task operations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::engine::dto::{
    BpmnErrorRequest, CompleteRequest, EngineErrorBody, ExtendLockRequest, FailureRequest,
    FetchAndLockRequest, LockedExternalTaskDto, UnlockRequest,
};
use crate::engine::interceptor::RequestInterceptor;
use crate::error::{ConfigError, EngineError, RemoteError};

/// Extra time granted on top of the long-polling timeout before the HTTP call gives up.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

/// Remote operations offered by the process engine.
///
/// Implementations report non-2xx answers as [`RemoteError::Status`] wrapped in
/// the variant of [`EngineError`] that matches the operation.
#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn fetch_and_lock(
        &self,
        request: &FetchAndLockRequest,
    ) -> Result<Vec<LockedExternalTaskDto>, EngineError>;

    async fn complete(&self, task_id: &str, request: &CompleteRequest) -> Result<(), EngineError>;

    async fn unlock(&self, task_id: &str) -> Result<(), EngineError>;

    async fn failure(&self, task_id: &str, request: &FailureRequest) -> Result<(), EngineError>;

    async fn bpmn_error(&self, task_id: &str, request: &BpmnErrorRequest)
    -> Result<(), EngineError>;

    async fn extend_lock(
        &self,
        task_id: &str,
        request: &ExtendLockRequest,
    ) -> Result<(), EngineError>;
}

/// [`EngineClient`] over the engine's REST API.
pub struct HttpEngineClient {
    base_url: reqwest::Url,
    client: reqwest::Client,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl HttpEngineClient {
    /// `base_url` must already be normalized (no trailing slash).
    pub fn new(
        base_url: impl Into<String>,
        interceptors: Vec<Arc<dyn RequestInterceptor>>,
    ) -> Result<Self, ConfigError> {
        let raw: String = base_url.into();
        let base_url = reqwest::Url::parse(&raw).map_err(|e| ConfigError::InvalidBaseUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidBaseUrl {
                url: raw,
                reason: "not a hierarchical URL".to_string(),
            });
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            base_url,
            client,
            interceptors,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.base_url.clone();
        // Hierarchical base checked in `new`, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn task_url(&self, task_id: &str, operation: &str) -> reqwest::Url {
        self.endpoint(&["external-task", task_id, operation])
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: reqwest::Url,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, RemoteError> {
        let mut request = self.client.post(url.clone()).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        for interceptor in &self.interceptors {
            request = interceptor.intercept(request);
        }

        tracing::debug!(url = %url, "POST to engine");

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            code: status.as_u16(),
            message: error_message(status, &body),
        })
    }
}

/// Extract the reason from an error body: the engine's `message` field, else the
/// raw body, else the canonical reason phrase.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<EngineErrorBody>(body)
        && let Some(message) = parsed.message
    {
        return message;
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    status.canonical_reason().unwrap_or("Unknown").to_string()
}

#[async_trait]
impl EngineClient for HttpEngineClient {
    async fn fetch_and_lock(
        &self,
        request: &FetchAndLockRequest,
    ) -> Result<Vec<LockedExternalTaskDto>, EngineError> {
        let url = self.endpoint(&["external-task", "fetchAndLock"]);
        let timeout = request
            .async_response_timeout
            .map(|ms| Duration::from_millis(ms) + LONG_POLL_GRACE);

        let response = self
            .post(url, request, timeout)
            .await
            .map_err(|source| EngineError::FetchAndLock { source })?;

        response
            .json::<Vec<LockedExternalTaskDto>>()
            .await
            .map_err(|e| EngineError::FetchAndLock {
                source: RemoteError::Decode(e.to_string()),
            })
    }

    async fn complete(&self, task_id: &str, request: &CompleteRequest) -> Result<(), EngineError> {
        self.post(self.task_url(task_id, "complete"), request, None)
            .await
            .map(drop)
            .map_err(|source| EngineError::CompleteTask {
                task_id: task_id.to_string(),
                source,
            })
    }

    async fn unlock(&self, task_id: &str) -> Result<(), EngineError> {
        self.post(self.task_url(task_id, "unlock"), &UnlockRequest {}, None)
            .await
            .map(drop)
            .map_err(|source| EngineError::UnlockTask {
                task_id: task_id.to_string(),
                source,
            })
    }

    async fn failure(&self, task_id: &str, request: &FailureRequest) -> Result<(), EngineError> {
        self.post(self.task_url(task_id, "failure"), request, None)
            .await
            .map(drop)
            .map_err(|source| EngineError::TaskFailure {
                task_id: task_id.to_string(),
                source,
            })
    }

    async fn bpmn_error(
        &self,
        task_id: &str,
        request: &BpmnErrorRequest,
    ) -> Result<(), EngineError> {
        self.post(self.task_url(task_id, "bpmnError"), request, None)
            .await
            .map(drop)
            .map_err(|source| EngineError::BpmnError {
                task_id: task_id.to_string(),
                source,
            })
    }

    async fn extend_lock(
        &self,
        task_id: &str,
        request: &ExtendLockRequest,
    ) -> Result<(), EngineError> {
        self.post(self.task_url(task_id, "extendLock"), request, None)
            .await
            .map(drop)
            .map_err(|source| EngineError::ExtendLock {
                task_id: task_id.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_engine_message() {
        let body = r#"{"type":"RestException","message":"Not Found!"}"#;
        assert_eq!(
            error_message(reqwest::StatusCode::NOT_FOUND, body),
            "Not Found!"
        );
    }

    #[test]
    fn error_message_falls_back_to_body_then_reason() {
        assert_eq!(
            error_message(reqwest::StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down"
        );
        assert_eq!(
            error_message(reqwest::StatusCode::NOT_FOUND, ""),
            "Not Found"
        );
    }

    #[test]
    fn task_urls() {
        let client = HttpEngineClient::new("http://localhost:8080/engine-rest", Vec::new()).unwrap();
        assert_eq!(
            client.task_url("abc", "bpmnError").as_str(),
            "http://localhost:8080/engine-rest/external-task/abc/bpmnError"
        );
        assert_eq!(
            client.endpoint(&["external-task", "fetchAndLock"]).as_str(),
            "http://localhost:8080/engine-rest/external-task/fetchAndLock"
        );
    }

    #[test]
    fn task_id_is_percent_encoded() {
        let client = HttpEngineClient::new("http://localhost:8080/engine-rest", Vec::new()).unwrap();
        let url = client.task_url("a/b?c#d", "complete");
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/engine-rest/external-task/a%2Fb%3Fc%23d/complete"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(matches!(
            HttpEngineClient::new("not a url", Vec::new()),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
        assert!(matches!(
            HttpEngineClient::new("mailto:engine@example.com", Vec::new()),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }
}
