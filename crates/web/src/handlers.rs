use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use plan_runner_core::push::PushEnvelope;
use plan_runner_jobs::{JobContext, PlanJob, process_plan_job};
use tokio::time::Instant;

use crate::AppState;

pub fn build_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz)).route("/pubsub/push", post(push))
}

async fn healthz() -> &'static str { "ok" }

/// Receive one pushed plan request and process it to completion.
///
/// Always acknowledges: malformed and invalid messages would fail the same way on
/// redelivery, and processing failures are reported on the pull request instead.
async fn push(State(ctx): State<JobContext>, body: Bytes) -> StatusCode {
    let received = Instant::now();
    let message = match PushEnvelope::decode(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::error!(error = %e, "Dropping undecodable message");
            return StatusCode::OK;
        }
    };
    match process_plan_job(PlanJob::new(message, received, &ctx), &ctx).await {
        Ok(_) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::OK,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{Body, to_bytes},
        http::Request,
    };
    use plan_runner_core::config::Config;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    fn router() -> Router { build_router().with_state(AppState::new(Arc::new(Config::default()))) }

    fn push_request(body: impl Into<Body>) -> Request<Body> {
        Request::post("/pubsub/push")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let response =
            router().oneshot(Request::get("/healthz").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_undecodable_message_is_acknowledged() {
        let response = router().oneshot(push_request("not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let envelope = json!({"message": {"data": "%%%", "messageId": "1"}});
        let response = router().oneshot(push_request(envelope.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_message_is_acknowledged() {
        // base64 of {"repo":{"full_name":"acme/infra"}}
        let envelope = json!({
            "message": {"data": "eyJyZXBvIjp7ImZ1bGxfbmFtZSI6ImFjbWUvaW5mcmEifX0=", "messageId": "1"},
            "subscription": "projects/p/subscriptions/plans",
        });
        let response = router().oneshot(push_request(envelope.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_processed_message_returns_no_content() {
        use std::os::unix::fs::PermissionsExt;

        use base64::{Engine, engine::general_purpose::STANDARD};
        use httpmock::prelude::*;
        use plan_runner_core::config::RunnerConfig;

        let bin = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let scripts = [("git", ":"), ("tofu", "[ \"$1\" = show ] && echo 'No changes.'")];
        for (name, body) in scripts {
            let path = bin.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\nexit 0\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let server = MockServer::start();
        let list = server.mock(|when, then| {
            when.method(GET).path("/repos/acme/infra/issues/7/comments");
            then.status(200).json_body(json!([]));
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/acme/infra/issues/7/comments")
                .body_includes("No changes.");
            then.status(201).json_body(json!({"id": 42}));
        });
        let update = server.mock(|when, then| {
            when.method(PATCH).path("/repos/acme/infra/issues/comments/42");
            then.status(200).json_body(json!({"id": 42}));
        });

        let mut config = Config::default();
        config.runner = RunnerConfig {
            git: bin.path().join("git"),
            tofu: bin.path().join("tofu"),
            workspace_root: Some(root.path().to_path_buf()),
            ..RunnerConfig::default()
        };
        let request = json!({
            "request_id": "r-1",
            "repo": {"full_name": "acme/infra"},
            "pull_request": {"number": 7, "head_sha": "0123abcd"},
            "installation": {"id": 1, "token": "ghs_secret"},
            "work": {"dir": ".", "plan_id": "prod"},
            "github_api_base_url": server.base_url(),
        });
        let envelope = json!({
            "message": {
                "data": STANDARD.encode(request.to_string()),
                "messageId": "1",
                "publishTime": "2024-05-01T12:00:00Z",
            },
            "subscription": "projects/p/subscriptions/plans",
        });
        let router = build_router().with_state(AppState::new(Arc::new(config)));
        let response = router.oneshot(push_request(envelope.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        list.assert_calls(1);
        create.assert_calls(1);
        update.assert_calls(1);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response =
            router().oneshot(Request::get("/nope").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
