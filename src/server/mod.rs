pub mod routes;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::backends::BackendFactory;
use crate::config::Config;
use crate::jobs::active::ActiveJobs;
use crate::jobs::cache::JobsCache;
use crate::jobs::JobContext;
use crate::processes::ProcessList;
use crate::storage::logs::FsLogStore;
use crate::storage::ObjectStore;

pub const TITLE: &str = "process-api";
pub const DESCRIPTION: &str =
    "OGC API - Processes server dispatching containerized jobs to local and cloud runtimes";

pub const CONFORMS_TO: [&str; 5] = [
    "http://schemas.opengis.net/ogcapi/processes/part1/1.0/openapi/schemas/",
    "http://www.opengis.net/spec/ogcapi-processes-1/1.0/conf/ogc-process-description",
    "http://www.opengis.net/spec/ogcapi-processes-1/1.0/conf/core",
    "http://www.opengis.net/spec/ogcapi-processes-1/1.0/conf/json",
    "http://www.opengis.net/spec/ogcapi-processes-1/1.0/conf/html",
];

/// Shared application state for the Axum server.
pub struct AppState {
    pub processes: Arc<ProcessList>,
    pub cache: Arc<JobsCache>,
    pub registry: Arc<ActiveJobs>,
    pub store: Arc<dyn ObjectStore>,
    pub log_store: Arc<FsLogStore>,
    pub backends: Arc<dyn BackendFactory>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Handles a job needs for terminal cleanup; the cache reference is
    /// weak because the cache owns the jobs.
    pub fn job_context(&self) -> JobContext {
        JobContext {
            cache: Arc::downgrade(&self.cache),
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            log_store: Arc::clone(&self.log_store),
            config: Arc::clone(&self.config),
        }
    }
}

/// Create the Axum router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(routes::landing_page))
        .route("/conformance", get(routes::conformance))
        .route("/processes", get(routes::process_list))
        .route("/processes/{processID}", get(routes::process_describe))
        .route("/processes/{processID}/execution", axum::routing::post(routes::execution))
        .route("/jobs", get(routes::job_list))
        .route("/jobs/{jobID}", get(routes::job_status).delete(routes::job_dismiss))
        .route("/jobs/{jobID}/results", get(routes::job_results))
        .route("/jobs/{jobID}/logs", get(routes::job_logs))
        .route("/jobs/{jobID}/metadata", get(routes::job_metadata))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// ===========================================================================
// Tests
// ===========================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Backend, ExecutionMode};
    use crate::errors::Error;
    use crate::jobs::testutil::{MemoryStore, ScriptedBackend};
    use crate::processes::{load_processes, Process};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    // -----------------------------------------------------------------------
    // Scripted backend factory - test double
    // -----------------------------------------------------------------------

    struct ScriptedFactory {
        backend: Arc<ScriptedBackend>,
    }

    impl BackendFactory for ScriptedFactory {
        fn for_process(
            &self,
            _process: &Process,
            _mode: ExecutionMode,
            _config: &Config,
        ) -> Result<Arc<dyn Backend>, Error> {
            Ok(self.backend.clone() as Arc<dyn Backend>)
        }
    }

    fn echo_definition() -> serde_json::Value {
        json!({
            "info": {
                "id": "echo",
                "version": "1.0.0",
                "title": "Echo",
                "jobControlOptions": ["sync-execute"]
            },
            "runtime": {"image": "alpine", "tag": "3.20", "entrypoint": "echo"},
            "inputs": [{"id": "msg"}],
            "outputs": [{"id": "result"}]
        })
    }

    async fn make_test_state(
        backend: Arc<ScriptedBackend>,
    ) -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(
            dir.path().join("echo.json"),
            echo_definition().to_string(),
        )
        .await
        .expect("write process");
        let processes = load_processes(dir.path()).await.expect("load");

        let config = Arc::new(Config {
            data_dir: dir.path().join("data"),
            poll_interval_ms: 20,
            ..Config::default()
        });
        let log_store = Arc::new(
            FsLogStore::new(config.data_dir.clone())
                .await
                .expect("log store"),
        );

        let state = Arc::new(AppState {
            processes: Arc::new(processes),
            cache: Arc::new(JobsCache::new(config.max_cache_size)),
            registry: Arc::new(ActiveJobs::new()),
            store: Arc::new(MemoryStore::default()),
            log_store,
            backends: Arc::new(ScriptedFactory { backend }),
            config,
        });
        (state, dir)
    }

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_landing_page_shape() {
        let (state, _dir) = make_test_state(Arc::new(ScriptedBackend::default())).await;
        let response = create_router(state).oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response.into_body()).await;
        assert_eq!(json["title"], TITLE);
        assert!(json["description"].is_string());
    }

    #[tokio::test]
    async fn test_conformance_lists_classes() {
        let (state, _dir) = make_test_state(Arc::new(ScriptedBackend::default())).await;
        let response = create_router(state)
            .oneshot(get("/conformance"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response.into_body()).await;
        let classes = json["conformsTo"].as_array().expect("array");
        assert_eq!(classes.len(), CONFORMS_TO.len());
    }

    #[tokio::test]
    async fn test_process_list_json_and_html() {
        let (state, _dir) = make_test_state(Arc::new(ScriptedBackend::default())).await;
        let app = create_router(state);

        let response = app.clone().oneshot(get("/processes")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_body()).await;
        assert_eq!(json[0]["id"], "echo");

        let response = app.clone().oneshot(get("/processes?f=html")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/processes?f=yaml")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_process_describe_hides_runtime() {
        let (state, _dir) = make_test_state(Arc::new(ScriptedBackend::default())).await;
        let response = create_router(state)
            .oneshot(get("/processes/echo"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response.into_body()).await;
        assert_eq!(json["id"], "echo");
        assert!(json.get("runtime").is_none());
    }

    #[tokio::test]
    async fn test_unknown_process_is_a_bad_request() {
        let (state, _dir) = make_test_state(Arc::new(ScriptedBackend::default())).await;
        let response = create_router(state)
            .oneshot(get("/processes/nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_execution_requires_inputs() {
        let (state, _dir) = make_test_state(Arc::new(ScriptedBackend::default())).await;
        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/processes/echo/execution")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_execution_rejects_missing_required_input() {
        let (state, _dir) = make_test_state(Arc::new(ScriptedBackend::default())).await;
        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/processes/echo/execution")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"inputs": {}}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_job_status_unknown_id_is_404() {
        let (state, _dir) = make_test_state(Arc::new(ScriptedBackend::default())).await;
        let response = create_router(state)
            .oneshot(get("/jobs/8e32e5a0-7b39-4c02-9b3c-6a3e5ed1f000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_job_status_non_uuid_id_is_404() {
        let (state, _dir) = make_test_state(Arc::new(ScriptedBackend::default())).await;
        let response = create_router(state)
            .oneshot(get("/jobs/not-a-uuid"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dismiss_unknown_job_is_410() {
        let (state, _dir) = make_test_state(Arc::new(ScriptedBackend::default())).await;
        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/jobs/8e32e5a0-7b39-4c02-9b3c-6a3e5ed1f000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_jobs_list_empty() {
        let (state, _dir) = make_test_state(Arc::new(ScriptedBackend::default())).await;
        let response = create_router(state).oneshot(get("/jobs")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_body()).await;
        assert_eq!(json, json!([]));
    }
}
