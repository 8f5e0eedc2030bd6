//! Integration tests against a mock engine.
//!
//! Each test spins up an Axum server on a random port that speaks the
//! external-task REST contract, and drives the real HTTP client against it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use external_task_client::engine::HttpEngineClient;
use external_task_client::task::{ExternalTask, TaskService, handler_fn};
use external_task_client::variables::VariableValueCodec;
use external_task_client::{
    EngineError, Error, ExternalTaskClient, ObjectTypeRegistry, TypedValue, VariableMap,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One request as seen by the mock engine.
#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    body: Value,
    authorization: Option<String>,
}

/// Mock engine state: queued fetch batches, recorded requests, failure switch.
struct MockEngine {
    batches: Mutex<VecDeque<Value>>,
    requests: Mutex<Vec<Recorded>>,
    not_found: AtomicBool,
    events: mpsc::UnboundedSender<Recorded>,
}

impl MockEngine {
    fn record(&self, path: String, headers: &HeaderMap, body: &str) {
        let recorded = Recorded {
            path,
            body: serde_json::from_str(body).unwrap_or(Value::Null),
            authorization: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        };
        self.requests.lock().push(recorded.clone());
        let _ = self.events.send(recorded);
    }

    fn paths(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.path.clone()).collect()
    }

    fn find(&self, path: &str) -> Option<Recorded> {
        self.requests.lock().iter().find(|r| r.path == path).cloned()
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(json!({"type": "RestException", "message": "Not Found!"})),
    )
        .into_response()
}

async fn fetch_and_lock(
    State(engine): State<Arc<MockEngine>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    engine.record("/external-task/fetchAndLock".to_string(), &headers, &body);
    if engine.not_found.load(Ordering::SeqCst) {
        return not_found();
    }
    let batch = engine.batches.lock().pop_front().unwrap_or_else(|| json!([]));
    axum::Json(batch).into_response()
}

async fn task_operation(
    State(engine): State<Arc<MockEngine>>,
    Path((id, operation)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Response {
    engine.record(format!("/external-task/{id}/{operation}"), &headers, &body);
    if engine.not_found.load(Ordering::SeqCst) {
        return not_found();
    }
    StatusCode::NO_CONTENT.into_response()
}

/// Start the mock engine, return (base url, engine, request events).
async fn start_engine() -> (String, Arc<MockEngine>, mpsc::UnboundedReceiver<Recorded>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = Arc::new(MockEngine {
        batches: Mutex::new(VecDeque::new()),
        requests: Mutex::new(Vec::new()),
        not_found: AtomicBool::new(false),
        events: tx,
    });

    let app = Router::new()
        .route("/engine-rest/external-task/fetchAndLock", post(fetch_and_lock))
        .route("/engine-rest/external-task/{id}/{operation}", post(task_operation))
        .with_state(Arc::clone(&engine));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://127.0.0.1:{port}/engine-rest/"), engine, rx)
}

fn task_json(id: &str, topic: &str, variables: Value) -> Value {
    json!({
        "id": id,
        "topicName": topic,
        "workerId": "integration-worker",
        "processInstanceId": "pi-1",
        "activityId": "ServiceTask_1",
        "retries": null,
        "priority": 0,
        "lockExpirationTime": "2024-03-01T10:00:05.000+0000",
        "businessKey": "order-1",
        "variables": variables,
    })
}

fn client(base_url: &str) -> ExternalTaskClient {
    ExternalTaskClient::builder()
        .base_url(base_url)
        .worker_id("integration-worker")
        .poll_interval(Duration::from_millis(20))
        .shutdown_timeout(Some(Duration::from_secs(2)))
        .build()
        .unwrap()
}

// ── Task operations ──────────────────────────────────────────────────

#[tokio::test]
async fn remote_404_maps_to_named_errors() {
    timeout(TEST_TIMEOUT, async {
        let (base_url, engine, _events) = start_engine().await;
        engine.not_found.store(true, Ordering::SeqCst);

        let http = HttpEngineClient::new(base_url.trim_end_matches('/'), Vec::new()).unwrap();
        let service = TaskService::new(
            "task-1",
            Arc::from("integration-worker"),
            Arc::new(http),
            VariableValueCodec::default(),
        );
        let task = ExternalTask::new("task-1", "foo", VariableValueCodec::default());

        let errors = vec![
            service.complete(&task).await.unwrap_err(),
            service.unlock().await.unwrap_err(),
            service.handle_failure("boom", None, 0, 0).await.unwrap_err(),
            service.handle_bpmn_error("E_1").await.unwrap_err(),
            service.extend_lock(1000).await.unwrap_err(),
        ];

        assert!(matches!(errors[0], Error::Engine(EngineError::CompleteTask { .. })));
        assert!(matches!(errors[1], Error::Engine(EngineError::UnlockTask { .. })));
        assert!(matches!(errors[2], Error::Engine(EngineError::TaskFailure { .. })));
        assert!(matches!(errors[3], Error::Engine(EngineError::BpmnError { .. })));
        assert!(matches!(errors[4], Error::Engine(EngineError::ExtendLock { .. })));
        for error in &errors {
            assert!(
                error
                    .to_string()
                    .contains("status code '404' - message: Not Found!"),
                "unexpected message: {error}"
            );
        }

        // Exactly one POST per call, each to its own path.
        assert_eq!(
            engine.paths(),
            [
                "/external-task/task-1/complete",
                "/external-task/task-1/unlock",
                "/external-task/task-1/failure",
                "/external-task/task-1/bpmnError",
                "/external-task/task-1/extendLock",
            ]
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn successful_operations_send_worker_id_and_parameters() {
    timeout(TEST_TIMEOUT, async {
        let (base_url, engine, _events) = start_engine().await;
        let http = HttpEngineClient::new(base_url.trim_end_matches('/'), Vec::new()).unwrap();
        let service = TaskService::new(
            "task-9",
            Arc::from("integration-worker"),
            Arc::new(http),
            VariableValueCodec::default(),
        );

        let mut variables = VariableMap::new();
        variables.insert("attempt".to_string(), TypedValue::integer(2));
        service
            .handle_failure_with("boom", Some("details"), 3, 5000, variables, VariableMap::new())
            .await
            .unwrap();
        service.extend_lock(30_000).await.unwrap();

        let failure = engine.find("/external-task/task-9/failure").unwrap();
        assert_eq!(failure.body["workerId"], "integration-worker");
        assert_eq!(failure.body["errorMessage"], "boom");
        assert_eq!(failure.body["errorDetails"], "details");
        assert_eq!(failure.body["retries"], 3);
        assert_eq!(failure.body["retryTimeout"], 5000);
        assert_eq!(failure.body["variables"]["attempt"]["value"], 2);

        let extend = engine.find("/external-task/task-9/extendLock").unwrap();
        assert_eq!(extend.body["newDuration"], 30_000);
    })
    .await
    .expect("test timed out");
}

// ── Polling ──────────────────────────────────────────────────────────

#[tokio::test]
async fn fetched_tasks_are_completed_end_to_end() {
    timeout(TEST_TIMEOUT, async {
        const N: usize = 5;
        let (base_url, engine, mut events) = start_engine().await;
        let batch: Vec<Value> = (0..N)
            .map(|i| {
                task_json(
                    &format!("task-{i}"),
                    "foo",
                    json!({"count": {"value": i, "type": "Integer", "valueInfo": {}}}),
                )
            })
            .collect();
        engine.batches.lock().push_back(Value::Array(batch));

        let client = client(&base_url);
        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .subscribe("foo")
            .lock_duration(5000)
            .handler(handler_fn(move |mut task: ExternalTask, service: TaskService| {
                let tx = tx.clone();
                async move {
                    let count: i32 = task.get_variable("count")?.unwrap_or_default();
                    task.set_variable("doubled", count * 2)?;
                    service.complete(&task).await?;
                    tx.send(task.id.clone())?;
                    Ok(())
                }
            }))
            .open()
            .unwrap();

        let mut done = Vec::new();
        for _ in 0..N {
            done.push(rx.recv().await.unwrap());
        }
        done.sort();
        let expected: Vec<String> = (0..N).map(|i| format!("task-{i}")).collect();
        assert_eq!(done, expected);

        client.stop().await;
        assert!(!client.is_active());

        let fetch = events.recv().await.unwrap();
        assert_eq!(fetch.path, "/external-task/fetchAndLock");
        assert_eq!(fetch.body["workerId"], "integration-worker");
        assert_eq!(fetch.body["maxTasks"], 10);
        assert_eq!(fetch.body["usePriority"], true);
        assert_eq!(fetch.body["topics"][0]["topicName"], "foo");
        assert_eq!(fetch.body["topics"][0]["lockDuration"], 5000);

        let complete = engine.find("/external-task/task-3/complete").unwrap();
        assert_eq!(complete.body["workerId"], "integration-worker");
        assert_eq!(complete.body["variables"]["doubled"]["value"], 6);
        assert_eq!(complete.body["variables"]["doubled"]["type"], "Integer");

        let completes = engine
            .paths()
            .iter()
            .filter(|p| p.ends_with("/complete"))
            .count();
        assert_eq!(completes, N);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_json_variable_skips_only_that_task() {
    timeout(TEST_TIMEOUT, async {
        let (base_url, engine, _events) = start_engine().await;
        engine.batches.lock().push_back(json!([
            task_json("good-1", "foo", json!({})),
            task_json(
                "broken",
                "foo",
                json!({"payload": {"value": "{\"open\": ", "type": "Json", "valueInfo": {}}})
            ),
            task_json(
                "good-2",
                "foo",
                json!({"payload": {"value": "{\"ok\": true}", "type": "Json", "valueInfo": {}}})
            ),
        ]));

        let client = client(&base_url);
        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .subscribe("foo")
            .handler(handler_fn(move |task: ExternalTask, service: TaskService| {
                let tx = tx.clone();
                async move {
                    service.complete(&task).await?;
                    tx.send(task.id.clone())?;
                    Ok(())
                }
            }))
            .open()
            .unwrap();

        let mut done = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        done.sort();
        assert_eq!(done, ["good-1", "good-2"]);

        client.stop().await;
        assert!(engine.find("/external-task/broken/complete").is_none());
    })
    .await
    .expect("test timed out");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Invoice {
    number: String,
    amount: i64,
}

#[tokio::test]
async fn object_variables_round_trip_through_registry() {
    timeout(TEST_TIMEOUT, async {
        let (base_url, engine, _events) = start_engine().await;
        engine.batches.lock().push_back(json!([task_json(
            "task-obj",
            "billing",
            json!({"invoice": {
                "value": "{\"number\":\"INV-1\",\"amount\":100}",
                "type": "Object",
                "valueInfo": {
                    "objectTypeName": "invoice",
                    "serializationDataFormat": "application/json"
                }
            }})
        )]));

        let client = ExternalTaskClient::builder()
            .base_url(&base_url)
            .worker_id("integration-worker")
            .poll_interval(Duration::from_millis(20))
            .object_types(ObjectTypeRegistry::new().with_json::<Invoice>("invoice"))
            .build()
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .subscribe("billing")
            .handler(handler_fn(move |mut task: ExternalTask, service: TaskService| {
                let tx = tx.clone();
                async move {
                    let mut invoice: Invoice = task
                        .get_variable("invoice")?
                        .ok_or_else(|| anyhow::anyhow!("invoice missing"))?;
                    invoice.amount += 50;
                    task.set_variable("invoice", invoice.clone())?;
                    service.complete(&task).await?;
                    tx.send(invoice)?;
                    Ok(())
                }
            }))
            .open()
            .unwrap();

        let invoice = rx.recv().await.unwrap();
        assert_eq!(
            invoice,
            Invoice {
                number: "INV-1".to_string(),
                amount: 150
            }
        );
        client.stop().await;

        let complete = engine.find("/external-task/task-obj/complete").unwrap();
        let variable = &complete.body["variables"]["invoice"];
        assert_eq!(variable["type"], "Object");
        assert_eq!(variable["valueInfo"]["objectTypeName"], "invoice");
        assert_eq!(
            variable["valueInfo"]["serializationDataFormat"],
            "application/json"
        );
        let payload: Invoice =
            serde_json::from_str(variable["value"].as_str().unwrap()).unwrap();
        assert_eq!(payload.amount, 150);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn basic_auth_header_is_sent() {
    timeout(TEST_TIMEOUT, async {
        let (base_url, _engine, mut events) = start_engine().await;

        let client = ExternalTaskClient::builder()
            .base_url(&base_url)
            .poll_interval(Duration::from_millis(20))
            .basic_auth("demo", secrecy::SecretString::from("secret".to_string()))
            .build()
            .unwrap();
        client
            .subscribe("foo")
            .handler(handler_fn(|_task: ExternalTask, _service: TaskService| async {
                Ok(())
            }))
            .open()
            .unwrap();

        let fetch = events.recv().await.unwrap();
        assert_eq!(
            fetch.authorization.as_deref(),
            Some("Basic ZGVtbzpzZWNyZXQ=")
        );
        client.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn fetch_errors_are_retried_on_next_cycle() {
    timeout(TEST_TIMEOUT, async {
        let (base_url, engine, mut events) = start_engine().await;
        engine.not_found.store(true, Ordering::SeqCst);

        let client = client(&base_url);
        client
            .subscribe("foo")
            .handler(handler_fn(|_task: ExternalTask, _service: TaskService| async {
                Ok(())
            }))
            .open()
            .unwrap();

        // The poller keeps fetching after failures.
        events.recv().await.unwrap();
        events.recv().await.unwrap();
        assert!(client.is_active());
        client.stop().await;
    })
    .await
    .expect("test timed out");
}
