mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use cortex_common::config::Config;
use cortex_common::exercise::ExerciseCatalog;
use cortex_common::orchestrator::Orchestrator;
use cortex_common::profile::ProfileRegistry;
use cortex_common::redis::{self as cortex_redis, RedisLedger, RedisResultStore, RedisTaskQueue};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Queue handle used only to report depth on /metrics
    pub queue_probe: Option<RedisTaskQueue>,
}

pub fn app(state: Arc<AppState>) -> Router {
    metrics::init_metrics();
    Router::new().merge(routes::routes()).with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(config.json_logs);

    info!("Cortex API booting...");

    let profiles = ProfileRegistry::load(&config.language_config_path).map_err(|e| {
        error!("Failed to load language profiles: {}", e);
        e
    })?;
    let catalog = ExerciseCatalog::load(&config.exercise_catalog_path)?;
    info!(
        languages = ?profiles.languages(),
        exercises = catalog.all().len(),
        "Configuration loaded"
    );

    let redis_conn = cortex_redis::connect(&config.redis_url)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;
    info!("Connected to Redis: {}", config.redis_url);

    let queue = RedisTaskQueue::new(redis_conn.clone());
    let orchestrator = Orchestrator::new(
        Arc::new(profiles),
        Arc::new(catalog),
        Arc::new(RedisLedger::new(redis_conn.clone())),
        Arc::new(queue.clone()),
        Arc::new(RedisResultStore::new(redis_conn)),
    );

    let state = Arc::new(AppState {
        orchestrator,
        queue_probe: Some(queue),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app(state)).await.context("Server error")?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use cortex_common::exercise::Exercise;
    use cortex_common::ledger::MemoryLedger;
    use cortex_common::queue::MemoryQueue;
    use cortex_common::store::{MemoryResultStore, ResultStore};
    use cortex_common::types::{ExecutionResult, Language};
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct TestApp {
        router: Router,
        queue: Arc<MemoryQueue>,
        results: Arc<MemoryResultStore>,
    }

    fn test_app() -> TestApp {
        let catalog = ExerciseCatalog::new(vec![Exercise {
            id: 1,
            title: "Hello World".to_string(),
            language: Language::Python,
            path: "python/exercises/practice/hello-world".to_string(),
        }])
        .unwrap();
        let queue = Arc::new(MemoryQueue::new());
        let results = Arc::new(MemoryResultStore::new());
        let orchestrator = Orchestrator::new(
            Arc::new(ProfileRegistry::builtin()),
            Arc::new(catalog),
            Arc::new(MemoryLedger::new()),
            queue.clone(),
            results.clone(),
        );
        let state = Arc::new(AppState {
            orchestrator,
            queue_probe: None,
        });
        TestApp {
            router: app(state),
            queue,
            results,
        }
    }

    fn submit_request(body: serde_json::Value, user_id: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/engine/execute")
            .header("content-type", "application/json");
        if let Some(user_id) = user_id {
            builder = builder.header("X-User-Id", user_id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn python_submission() -> serde_json::Value {
        serde_json::json!({
            "exercise_id": 1,
            "language": "python",
            "code": STANDARD.encode("def hello():\n    return 'Hello, World!'\n"),
        })
    }

    #[tokio::test]
    async fn test_submit_returns_accepted_with_task_id() {
        let app = test_app();
        let response = app
            .router
            .oneshot(submit_request(python_submission(), Some("7")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        let task_id = body["task_id"].as_str().unwrap();
        assert!(Uuid::parse_str(task_id).is_ok());
        assert_eq!(app.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_requires_user_header() {
        let app = test_app();
        let response = app
            .router
            .oneshot(submit_request(python_submission(), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(app.queue.is_empty());
    }

    #[tokio::test]
    async fn test_language_mismatch_is_bad_request() {
        let app = test_app();
        let mut body = python_submission();
        body["language"] = serde_json::json!("go");

        let response = app.router.oneshot(submit_request(body, Some("7"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().is_some());
        assert!(app.queue.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_exercise_is_not_found() {
        let app = test_app();
        let mut body = python_submission();
        body["exercise_id"] = serde_json::json!(99);

        let response = app.router.oneshot(submit_request(body, Some("7"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pending_result_is_not_found() {
        let app = test_app();
        let uri = format!("/engine/result/{}", Uuid::new_v4());
        let response = app.router.oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stored_result_is_returned() {
        let app = test_app();
        let task_id = Uuid::new_v4();
        let result = ExecutionResult {
            task_id,
            success: true,
            stdout: "ok".to_string(),
            stderr: String::new(),
            execution_time_ms: 10,
            memory_used_kb: 1024,
            cpu_usage_percent: 0.0,
            exit_code: Some(0),
            timed_out: false,
            language: Language::Python,
            exercise_id: 1,
            test_case_results: Vec::new(),
        };
        app.results.put(&result, Duration::from_secs(60)).await.unwrap();

        let uri = format!("/engine/result/{}", task_id);
        let response = app.router.oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["task_id"], serde_json::json!(task_id.to_string()));
        assert_eq!(body["success"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_malformed_task_id_is_bad_request() {
        let app = test_app();
        let response = app.router.oneshot(get("/engine/result/not-a-uuid")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app = test_app();
        let response = app.router.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.router.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
