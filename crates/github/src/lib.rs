pub mod comment;

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use octocrab::{Octocrab, models::CommentId, service::middleware::retry::RetryConfig};
use plan_runner_core::{deadline::Deadline, models::WorkRequest};
use serde::{Deserialize, Serialize};

use crate::comment::Marker;

/// Issue-comment API for a single repository, authenticated with an installation token.
#[derive(Clone)]
pub struct GitHub {
    client: Octocrab,
    owner: String,
    repo: String,
    timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
struct IssueComment {
    id: CommentId,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Serialize)]
struct PageParams {
    per_page: u8,
}

#[derive(Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

impl GitHub {
    pub fn new(api_base_url: &str, token: &str, full_name: &str, timeout: Duration) -> Result<Self> {
        let (owner, repo) = full_name
            .split_once('/')
            .with_context(|| format!("Invalid repository name {full_name}"))?;
        // Creating a comment is not idempotent, so never replay requests.
        let client = Octocrab::builder()
            .base_uri(api_base_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid API base URL {api_base_url}"))?
            .personal_token(token.to_string())
            .add_retry_config(RetryConfig::None)
            .build()
            .context("Failed to create GitHub client")?;
        Ok(Self { client, owner: owner.to_string(), repo: repo.to_string(), timeout })
    }

    pub fn for_request(request: &WorkRequest, timeout: Duration) -> Result<Self> {
        Self::new(
            &request.api_base_url,
            &request.installation.token,
            &request.repo.full_name,
            timeout,
        )
    }

    /// Find the sticky comment among the 100 most recent comments on the pull request.
    pub async fn find_comment(
        &self,
        number: u64,
        marker: &Marker,
        deadline: &Deadline,
    ) -> Result<Option<CommentId>> {
        let route = format!("/repos/{}/{}/issues/{number}/comments", self.owner, self.repo);
        let comments: Vec<IssueComment> = deadline
            .bounded(self.timeout)
            .run(self.client.get(route, Some(&PageParams { per_page: 100 })))
            .await
            .context("list comments")?
            .map_err(|e| api_error("list comments", e))?;
        Ok(comments
            .into_iter()
            .find(|c| c.body.as_deref().is_some_and(|body| marker.is_in(body)))
            .map(|c| c.id))
    }

    /// Update `existing` in place, or create a new comment when there is none.
    pub async fn upsert_comment(
        &self,
        number: u64,
        existing: Option<CommentId>,
        body: &str,
        deadline: &Deadline,
    ) -> Result<CommentId> {
        let deadline = deadline.bounded(self.timeout);
        let payload = CommentBody { body };
        if let Some(id) = existing {
            let route = format!("/repos/{}/{}/issues/comments/{id}", self.owner, self.repo);
            let _: IssueComment = deadline
                .run(self.client.patch(route, Some(&payload)))
                .await
                .context("update comment")?
                .map_err(|e| api_error("update comment", e))?;
            tracing::info!(comment_id = %id, "Comment updated");
            return Ok(id);
        }
        let route = format!("/repos/{}/{}/issues/{number}/comments", self.owner, self.repo);
        let comment: IssueComment = deadline
            .run(self.client.post(route, Some(&payload)))
            .await
            .context("create comment")?
            .map_err(|e| api_error("create comment", e))?;
        tracing::info!(comment_id = %comment.id, "Comment created");
        Ok(comment.id)
    }
}

fn api_error(op: &'static str, err: octocrab::Error) -> anyhow::Error {
    match err {
        octocrab::Error::GitHub { source, .. } => {
            anyhow!("{op}: {}: {}", source.status_code, source.message.trim())
        }
        err => anyhow::Error::new(err).context(op),
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn client(server: &MockServer) -> GitHub {
        GitHub::new(&server.base_url(), "ghs_token", "acme/infra", Duration::from_secs(5)).unwrap()
    }

    fn deadline() -> Deadline { Deadline::after(Duration::from_secs(30)) }

    #[tokio::test]
    async fn test_find_comment() {
        let server = MockServer::start();
        let list = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/acme/infra/issues/7/comments")
                .query_param("per_page", "100")
                .header_exists("authorization");
            then.status(200).json_body(json!([
                {"id": 1, "body": "LGTM"},
                {"id": 2, "body": null},
                {"id": 3, "body": "<!-- runners-poc:plan:staging -->\nold"},
                {"id": 4, "body": "<!-- runners-poc:plan:prod -->\nold"},
                {"id": 5, "body": "<!-- runners-poc:plan:prod -->\nduplicate"},
            ]));
        });
        let github = client(&server);
        let found = github.find_comment(7, &Marker::for_plan("prod"), &deadline()).await.unwrap();
        assert_eq!(found, Some(CommentId(4)));
        let missing = github.find_comment(7, &Marker::for_plan(""), &deadline()).await.unwrap();
        assert_eq!(missing, None);
        list.assert_calls(2);
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let server = MockServer::start();
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/acme/infra/issues/7/comments")
                .json_body(json!({"body": "first"}));
            then.status(201).json_body(json!({"id": 42, "body": "first"}));
        });
        let update = server.mock(|when, then| {
            when.method(PATCH)
                .path("/repos/acme/infra/issues/comments/42")
                .json_body(json!({"body": "second"}));
            then.status(200).json_body(json!({"id": 42, "body": "second"}));
        });
        let github = client(&server);
        let id = github.upsert_comment(7, None, "first", &deadline()).await.unwrap();
        assert_eq!(id, CommentId(42));
        let id = github.upsert_comment(7, Some(id), "second", &deadline()).await.unwrap();
        assert_eq!(id, CommentId(42));
        create.assert_calls(1);
        update.assert_calls(1);
    }

    #[tokio::test]
    async fn test_api_error_carries_status_and_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repos/acme/infra/issues/7/comments");
            then.status(403).json_body(json!({
                "message": "  Resource not accessible by integration ",
                "documentation_url": "https://docs.github.com/rest",
            }));
        });
        let err = client(&server)
            .find_comment(7, &Marker::for_plan("prod"), &deadline())
            .await
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.starts_with("list comments: 403"), "{message}");
        assert!(message.ends_with(": Resource not accessible by integration"), "{message}");
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/repos/acme/infra/issues/7/comments");
            then.status(201).delay(Duration::from_secs(5)).json_body(json!({"id": 1}));
        });
        let github =
            GitHub::new(&server.base_url(), "t", "acme/infra", Duration::from_millis(200)).unwrap();
        let err = github.upsert_comment(7, None, "body", &deadline()).await.unwrap_err();
        assert_eq!(format!("{err:#}"), "create comment: deadline exceeded");
    }

    #[test]
    fn test_invalid_repository() {
        let err = GitHub::new("https://api.github.com", "t", "acme", Duration::from_secs(1));
        assert!(err.is_err());
    }
}
