//! API Router configuration

use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let api_routes = Router::new()
        // Health and status
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::daemon_status))
        .route("/sweeps", post(handlers::trigger_sweep))
        // Clusters
        .route(
            "/clusters",
            get(handlers::list_clusters).post(handlers::create_cluster),
        )
        .route(
            "/clusters/:id",
            get(handlers::get_cluster).delete(handlers::delete_cluster),
        )
        .route("/clusters/:id/refresh", post(handlers::refresh_cluster))
        .route("/clusters/:id/rename", post(handlers::rename_cluster))
        .route("/clusters/:id/extend", post(handlers::extend_cluster))
        .route("/clusters/:id/terminate", post(handlers::terminate_cluster))
        // Scheduled jobs
        .route("/jobs", get(handlers::list_jobs).post(handlers::create_job))
        .route(
            "/jobs/:id",
            get(handlers::get_job)
                .put(handlers::update_job)
                .delete(handlers::delete_job),
        )
        .route("/jobs/:id/run", post(handlers::run_job))
        .route("/jobs/:id/runs", get(handlers::list_job_runs));

    let router = Router::new()
        .route("/metrics", get(handlers::metrics))
        .nest("/api/v1", api_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http());

    let router = if config.enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::rest::extract::USER_HEADER;
    use crate::scheduler::Scheduler;
    use atmo_control::{
        AtmoMetrics, ManualClock, Mailer, NotificationSettings, Orchestrator, RecordingNotifier,
    };
    use atmo_provisioning::InMemoryProvisioner;
    use atmo_store::InMemoryStorage;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use prometheus::Registry;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2016, 4, 5, 13, 25, 47).unwrap(),
        ));
        let registry = Arc::new(Registry::new());
        let metrics = AtmoMetrics::new(&registry).unwrap();
        let orchestrator = Orchestrator::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(InMemoryProvisioner::new()),
            Mailer::new(
                Arc::new(RecordingNotifier::new()),
                NotificationSettings::default(),
            ),
            clock,
        )
        .with_metrics(Arc::new(metrics));
        let (scheduler, _rx) = Scheduler::new(Default::default(), orchestrator.clone());
        create_router(
            AppState::new(orchestrator, scheduler, registry),
            &ServerConfig::default(),
        )
    }

    fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn cluster_body() -> Value {
        json!({
            "identifier": "john-analysis",
            "size": 3,
            "public_key": "ssh-rsa AAAAB3NzaC1yc2E john@laptop",
            "emr_release": "5.2.1"
        })
    }

    fn job_body() -> Value {
        json!({
            "identifier": "test-spark-job",
            "size": 2,
            "interval_in_hours": 24,
            "job_timeout": 12,
            "start_date": "2016-04-05T12:00:00Z",
            "is_enabled": true,
            "notebook_key": "jobs/test-spark-job/notebook.ipynb",
            "result_visibility": "private",
            "emr_release": "5.2.1"
        })
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = app();
        let (status, body) = send(&app, request("GET", "/api/v1/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_missing_user_header_is_unauthorized() {
        let app = app();
        let (status, body) = send(&app, request("GET", "/api/v1/clusters", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_cluster_lifecycle() {
        let app = app();
        let user = Some("john@example.com");

        let (status, cluster) = send(
            &app,
            request("POST", "/api/v1/clusters", user, Some(cluster_body())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(cluster["most_recent_status"], "STARTING");
        let id = cluster["id"].as_str().unwrap().to_string();

        let (status, listed) = send(&app, request("GET", "/api/v1/clusters", user, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, _) = send(
            &app,
            request(
                "GET",
                &format!("/api/v1/clusters/{}", id),
                Some("mallory@example.com"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, terminated) = send(
            &app,
            request("POST", &format!("/api/v1/clusters/{}/terminate", id), user, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(terminated["most_recent_status"], "TERMINATED");

        let (status, _) = send(
            &app,
            request("DELETE", &format!("/api/v1/clusters/{}", id), user, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app,
            request("GET", &format!("/api/v1/clusters/{}", id), user, None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_cluster_lists_field_errors() {
        let app = app();
        let mut body = cluster_body();
        body["size"] = json!(0);
        body["public_key"] = json!("");

        let (status, body) = send(
            &app,
            request("POST", "/api/v1/clusters", Some("john@example.com"), Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let fields: Vec<&str> = body["details"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["field"].as_str())
            .collect();
        assert!(fields.contains(&"size"));
        assert!(fields.contains(&"public_key"));
    }

    #[tokio::test]
    async fn test_job_run_now_is_idempotent() {
        let app = app();
        let user = Some("john@example.com");

        let (status, job) = send(&app, request("POST", "/api/v1/jobs", user, Some(job_body()))).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = job["id"].as_str().unwrap().to_string();

        let (status, detail) = send(&app, request("GET", &format!("/api/v1/jobs/{}", id), user, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["schedule"], "due");

        let run_uri = format!("/api/v1/jobs/{}/run", id);
        let (status, first) = send(&app, request("POST", &run_uri, user, None)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["started"], true);

        let (status, second) = send(&app, request("POST", &run_uri, user, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["started"], false);

        let (_, runs) = send(&app, request("GET", &format!("/api/v1/jobs/{}/runs", id), user, None)).await;
        assert_eq!(runs.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_id_is_rejected() {
        let app = app();
        let (status, _) = send(
            &app,
            request("GET", "/api/v1/jobs/not-a-uuid", Some("john@example.com"), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_count_started_clusters() {
        let app = app();
        let (status, _) = send(
            &app,
            request("POST", "/api/v1/clusters", Some("john@example.com"), Some(cluster_body())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request("GET", "/metrics", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("atmo_clusters_started_total{emr_release=\"5.2.1\"} 1"));
    }

    #[tokio::test]
    async fn test_sweep_runs_inline_without_scheduler() {
        let app = app();
        let (status, body) = send(
            &app,
            request("POST", "/api/v1/sweeps", None, Some(json!({ "pass": "maintenance" }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pass"], "maintenance");
    }
}
