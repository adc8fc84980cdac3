//! HTTP API and worker integration.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio::sync::watch;
use tower::ServiceExt;

use esg_controller::build_router;
use esg_controller::queue::{WorkQueue, run_worker};
use esg_controller::state::AppState;
use esg_core::controller::{Controller, ReconcileConfig, Scheduler, SecretStore, SpecSource};
use esg_core::spec::ObjectRef;
use esg_core::store::ResourceStore;
use esg_storage::{MemoryBackend, StorageBackend};

struct TestApp {
    router: Router,
    store: ResourceStore,
    queue: WorkQueue,
    shutdown: watch::Sender<bool>,
}

fn app() -> TestApp {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let store = ResourceStore::new(backend);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let queue = WorkQueue::new(Duration::from_secs(300), shutdown_rx);
    let router = build_router(Arc::new(AppState {
        store: store.clone(),
        queue: queue.clone(),
    }));
    TestApp {
        router,
        store,
        queue,
        shutdown,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn password_spec() -> Value {
    json!({
        "labels": { "team": "db" },
        "spec": {
            "secret": { "name": "db" },
            "generators": [ { "name": "pw", "type": "string", "length": 12 } ],
            "templates": [ { "key": "PASSWORD", "templateString": "{{ pw }}" } ]
        }
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app();
    let (status, body) = send(&app.router, "GET", "/v1/sys/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn apply_stores_and_enqueues() {
    let app = app();
    let (status, body) = send(&app.router, "PUT", "/v1/specs/apps/db-spec", Some(password_spec())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["name"], "db-spec");
    assert_eq!(body["metadata"]["namespace"], "apps");
    assert_eq!(body["metadata"]["labels"]["team"], "db");
    assert!(!body["metadata"]["uid"].as_str().unwrap().is_empty());
    assert_eq!(body["spec"]["generators"][0]["type"], "string");
    assert_eq!(app.queue.len(), 1);

    let (status, fetched) = send(&app.router, "GET", "/v1/specs/apps/db-spec", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, body);

    let (status, list) = send(&app.router, "GET", "/v1/specs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["specs"], json!([{ "namespace": "apps", "name": "db-spec" }]));
}

#[tokio::test]
async fn invalid_specs_are_rejected_as_json() {
    let app = app();

    let mut unknown_type = password_spec();
    unknown_type["spec"]["generators"][0]["type"] = json!("uuid");
    let (status, body) = send(&app.router, "PUT", "/v1/specs/apps/s", Some(unknown_type)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
    assert!(body["message"].as_str().unwrap().contains("unsupported type 'uuid'"));

    let mut duplicate_charset = password_spec();
    duplicate_charset["spec"]["generators"][0]["charset"] = json!("aab");
    let (status, _) = send(&app.router, "PUT", "/v1/specs/apps/s", Some(duplicate_charset)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app.router, "PUT", "/v1/specs/Bad_Namespace/s", Some(password_spec())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.queue.is_empty());
    assert!(app.store.list_specs().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_objects_are_404() {
    let app = app();
    for (method, uri) in [
        ("GET", "/v1/specs/apps/nope"),
        ("DELETE", "/v1/specs/apps/nope"),
        ("GET", "/v1/secrets/apps/nope"),
    ] {
        let (status, body) = send(&app.router, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(body["error"], "not_found");
    }
}

#[tokio::test]
async fn worker_materializes_applied_spec_once() {
    let app = app();
    let controller = Arc::new(Controller::new(
        Arc::new(app.store.clone()) as Arc<dyn SpecSource>,
        Arc::new(app.store.clone()) as Arc<dyn SecretStore>,
        Arc::new(app.queue.clone()) as Arc<dyn Scheduler>,
        ReconcileConfig {
            resync_interval: Duration::from_millis(20),
            retry_interval: Duration::from_millis(20),
        },
    ));
    let worker = tokio::spawn(run_worker(
        0,
        app.queue.clone(),
        controller,
        app.shutdown.subscribe(),
    ));

    let (status, _) = send(&app.router, "PUT", "/v1/specs/apps/db-spec", Some(password_spec())).await;
    assert_eq!(status, StatusCode::OK);

    let target = ObjectRef::new("apps", "db");
    let secret = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(secret) = app.store.get_secret(&target).await {
                return secret;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // Let several resync passes run; none may change the secret.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(app.store.get_secret(&target).await.unwrap(), secret);
    assert_eq!(app.store.list_secrets().await.unwrap(), vec![target.clone()]);

    let (status, body) = send(&app.router, "GET", "/v1/secrets/apps/db", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["keys"], json!(["PASSWORD"]));
    assert_eq!(body["ownerReferences"][0]["kind"], "SecretSynthesis");
    assert!(body.get("data").is_none());
    let password = std::str::from_utf8(&secret.data["PASSWORD"]).unwrap();
    assert!(!body.to_string().contains(password));

    app.shutdown.send(true).unwrap();
    app.queue.shut_down();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();

    let (status, body) = send(&app.router, "DELETE", "/v1/specs/apps/db-spec", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["collected"], json!([{ "namespace": "apps", "name": "db" }]));
    assert!(app.store.list_secrets().await.unwrap().is_empty());
}
