//! Route configuration for the receiver.

use std::sync::Arc;

use axum::routing::{get, post, Router};
use tower_http::trace::TraceLayer;

use super::ReceiverState;
use super::handlers::{
    health_check, invoke_callback, receive_alerts, receive_log_line, receive_manual,
    receive_resource_change, remove_callback, run_action,
};

/// Create the receiver router.
pub fn create_router(state: Arc<ReceiverState>) -> Router {
    let api_routes = Router::new()
        // Event sources
        .route("/alerts", post(receive_alerts))
        .route("/k8s", post(receive_resource_change))
        .route("/logs", post(receive_log_line))
        .route("/manual", post(receive_manual))
        // Synchronous action runs
        .route("/trigger", post(run_action))
        .route("/callbacks/{id}", post(invoke_callback).delete(remove_callback));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Map, Value, json};
    use tower::ServiceExt;
    use warden_core::{
        ActionBindingDef, CallbackBinding, DispatcherConfig, EventDispatcher, ManualTriggerDef, PlaybookDefinition,
        PoolConfig, PrometheusTriggerDef, SinkConfig, TriggerDef, WorkerPool,
    };
    use warden_sinks::DefaultSinkFactory;

    fn make_test_state(playbooks: &[PlaybookDefinition]) -> Arc<ReceiverState> {
        let actions = warden_actions::builtin_registry().unwrap();
        let dispatcher = Arc::new(EventDispatcher::new(Arc::new(actions), DispatcherConfig::default()));
        dispatcher
            .reload(playbooks, &[SinkConfig::new("console", "log")], &Map::new(), &DefaultSinkFactory)
            .unwrap();
        let pool = Arc::new(WorkerPool::start(Arc::clone(&dispatcher), &PoolConfig::default()));
        Arc::new(ReceiverState::new(dispatcher, pool))
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_processed(state: &ReceiverState, count: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.pool().stats().processed() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("events processed");
    }

    mod health_tests {
        use super::*;

        #[tokio::test]
        async fn test_health_reports_generation() {
            let state = make_test_state(&[]);
            let app = create_router(Arc::clone(&state));

            let response = app
                .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["status"], "ok");
            assert_eq!(json["generation"], state.dispatcher().current().version());
            assert_eq!(json["sinks"], 1);
        }
    }

    mod event_tests {
        use super::*;

        #[tokio::test]
        async fn test_alertmanager_payload_queues_each_alert() {
            let alert_playbook = PlaybookDefinition::new(
                TriggerDef::OnPrometheusAlert(PrometheusTriggerDef::default()),
                vec![ActionBindingDef::new("add_alert_annotations", Value::Null)],
            );
            let state = make_test_state(&[alert_playbook]);
            let app = create_router(Arc::clone(&state));
            let payload = json!({
                "receiver": "warden",
                "status": "firing",
                "alerts": [
                    {"status": "firing", "labels": {"alertname": "KubePodCrashLooping", "pod": "api-1"}},
                    {"status": "firing", "labels": {"alertname": "KubePodCrashLooping", "pod": "api-2"}}
                ]
            });

            let response = app.oneshot(post_json("/api/alerts", &payload)).await.unwrap();

            assert_eq!(response.status(), StatusCode::ACCEPTED);
            assert_eq!(body_json(response).await["accepted"], 2);
            wait_processed(&state, 2).await;
        }

        #[tokio::test]
        async fn test_resource_change_is_queued() {
            let state = make_test_state(&[]);
            let app = create_router(Arc::clone(&state));
            let change = json!({
                "operation": "update",
                "kind": "Pod",
                "obj": {"metadata": {"name": "api-1", "namespace": "prod"}}
            });

            let response = app.oneshot(post_json("/api/k8s", &change)).await.unwrap();

            assert_eq!(response.status(), StatusCode::ACCEPTED);
            wait_processed(&state, 1).await;
        }

        #[tokio::test]
        async fn test_malformed_body_is_rejected() {
            let state = make_test_state(&[]);
            let app = create_router(state);

            let response = app
                .oneshot(post_json("/api/logs", &json!({"pod": "api-1"})))
                .await
                .unwrap();

            assert!(response.status().is_client_error());
        }

        #[tokio::test]
        async fn test_shutdown_pool_returns_unavailable() {
            let state = make_test_state(&[]);
            state.pool().shutdown().await;
            let app = create_router(Arc::clone(&state));

            let response = app
                .oneshot(post_json("/api/manual", &json!({"name": "restart"})))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    mod action_tests {
        use super::*;

        #[tokio::test]
        async fn test_trigger_runs_action_and_reports() {
            let state = make_test_state(&[]);
            let app = create_router(state);
            let request = json!({
                "action_name": "create_finding",
                "action_params": {"title": "checked by operator"}
            });

            let response = app.oneshot(post_json("/api/trigger", &request)).await.unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["fired"], 1);
            assert_eq!(json["delivered"], json!(["console"]));
        }

        #[tokio::test]
        async fn test_trigger_with_invalid_params_is_bad_request() {
            let state = make_test_state(&[]);
            let app = create_router(state);
            let request = json!({"action_name": "create_finding", "action_params": {}});

            let response = app.oneshot(post_json("/api/trigger", &request)).await.unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let json = body_json(response).await;
            assert!(json["message"].as_str().unwrap().contains("title"));
        }

        #[tokio::test]
        async fn test_unknown_action_is_not_found() {
            let state = make_test_state(&[]);
            let app = create_router(state);
            let request = json!({"action_name": "reboot_cluster"});

            let response = app.oneshot(post_json("/api/trigger", &request)).await.unwrap();

            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn test_callback_ids_are_validated() {
            let state = make_test_state(&[PlaybookDefinition::new(
                TriggerDef::OnManual(ManualTriggerDef::default()),
                vec![ActionBindingDef::new("create_finding", json!({"title": "x"}))],
            )]);
            let app = create_router(state);

            let malformed = app
                .clone()
                .oneshot(post_json("/api/callbacks/not-an-id", &json!({})))
                .await
                .unwrap();
            assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

            let unknown = app
                .oneshot(post_json(
                    "/api/callbacks/6f1c0f5e-2b7a-4c4e-9a51-3a0f2d1b7c11",
                    &json!({}),
                ))
                .await
                .unwrap();
            assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn test_deleted_callback_can_no_longer_run() {
            let state = make_test_state(&[]);
            let id = state.dispatcher().callbacks().subscribe(
                CallbackBinding::new("create_finding").with_params(json!({"title": "retry"})),
            );
            let app = create_router(Arc::clone(&state));
            let delete = |id: String| {
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/callbacks/{id}"))
                    .body(Body::empty())
                    .unwrap()
            };

            let removed = app.clone().oneshot(delete(id.to_string())).await.unwrap();
            assert_eq!(removed.status(), StatusCode::NO_CONTENT);
            assert!(state.dispatcher().callbacks().is_empty());

            let again = app.clone().oneshot(delete(id.to_string())).await.unwrap();
            assert_eq!(again.status(), StatusCode::NOT_FOUND);

            let invoked = app
                .oneshot(post_json(&format!("/api/callbacks/{id}"), &json!({})))
                .await
                .unwrap();
            assert_eq!(invoked.status(), StatusCode::NOT_FOUND);
        }
    }
}
