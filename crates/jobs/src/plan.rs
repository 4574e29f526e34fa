use octocrab::models::CommentId;
use plan_runner_core::{
    deadline::Deadline,
    models::{PlanResult, ValidationError, WorkRequest},
    push::DecodedMessage,
    timings::{Stage, Timings, timed},
};
use plan_runner_github::{
    GitHub,
    comment::{Marker, render_body},
};
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::JobContext;

/// A decoded plan request, stamped at receipt.
#[derive(Debug, Clone)]
pub struct PlanJob {
    pub message_id: String,
    pub subscription: String,
    pub published: Option<OffsetDateTime>,
    pub request: WorkRequest,
    pub received: Instant,
    pub deadline: Deadline,
}

impl PlanJob {
    pub fn new(message: DecodedMessage, received: Instant, ctx: &JobContext) -> Self {
        Self {
            message_id: message.message_id,
            subscription: message.subscription,
            published: message.published,
            request: message.request,
            received,
            deadline: Deadline::at(received + ctx.config.runner.request_timeout()),
        }
    }
}

/// Result of a request that passed validation.
#[derive(Debug, Clone)]
pub struct PlanReport {
    /// Whether the comment carries a plan rather than a failure description.
    pub plan_succeeded: bool,
    pub comment_id: Option<CommentId>,
    /// Total as rendered into the comment, before the final update.
    pub first_total_ms: u64,
    pub timings: Timings,
}

/// Process a plan request from validation through to the final comment update.
///
/// Workspace and tool failures are published as the comment body. Publishing failures
/// are logged and never abort the request. Only validation failures are returned.
pub async fn process_plan_job(
    job: PlanJob,
    ctx: &JobContext,
) -> Result<PlanReport, ValidationError> {
    let PlanJob { message_id, subscription, published, mut request, received, deadline } = job;
    request.apply_defaults(&ctx.config.github.api_base_url);
    tracing::info!(
        request_id = %request.request_id,
        message_id = %message_id,
        subscription = %subscription,
        repo = %request.repo.full_name,
        pr = request.pull_request.number,
        sha = %request.pull_request.head_sha,
        plan_id = %request.work.plan_id,
        "Message received"
    );
    if let Err(e) = request.validate() {
        tracing::error!(request_id = %request.request_id, error = %e, "Invalid message");
        return Err(e);
    }

    let mut timings = Timings::default();
    if let Some(published) = published {
        timings.record_queue_latency(published, OffsetDateTime::now_utc());
    }

    let (plan, plan_succeeded) =
        match ctx.executor.clone_and_plan(&request, &deadline, &mut timings).await {
            Ok(result) => (result.text, true),
            Err(e) => {
                tracing::error!(
                    request_id = %request.request_id,
                    error = format!("{e:#}"),
                    "Plan failed"
                );
                (PlanResult::new(format!("tofu execution failed:\n{e:#}")).text, false)
            }
        };

    let marker = Marker::for_plan(&request.work.plan_id);
    let number = request.pull_request.number;
    let github = match GitHub::for_request(&request, ctx.config.github.request_timeout()) {
        Ok(github) => Some(github),
        Err(e) => {
            tracing::error!(
                request_id = %request.request_id,
                error = format!("{e:#}"),
                "Comment failed"
            );
            None
        }
    };

    // First pass: get the plan in front of the author as soon as possible.
    let mut comment_id = None;
    if let Some(github) = &github {
        let existing = match timed(
            &mut timings,
            Stage::CommentList,
            github.find_comment(number, &marker, &deadline),
        )
        .await
        {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!(
                    request_id = %request.request_id,
                    error = format!("{e:#}"),
                    "List comments failed"
                );
                None
            }
        };
        let body = render_body(&request, &marker, &plan, None);
        comment_id = upsert(github, &mut timings, &request, existing, &body, &deadline).await;
    }
    timings.finish(received);
    let first_total_ms = timings.total_ms;

    // Second pass: patch the same comment with the timings line.
    if let Some(github) = &github {
        let body = render_body(&request, &marker, &plan, Some(&timings));
        if let Some(id) = upsert(github, &mut timings, &request, comment_id, &body, &deadline).await
        {
            comment_id = Some(id);
        }
    }
    timings.finish(received);

    tracing::info!(
        request_id = %request.request_id,
        plan_succeeded,
        comment_id = comment_id.map(|id| id.0),
        queue_to_runner_ms = timings.queue_to_runner_ms,
        git_fetch_ms = timings.git_fetch_ms,
        git_checkout_ms = timings.git_checkout_ms,
        tofu_init_ms = timings.tofu_init_ms,
        tofu_plan_ms = timings.tofu_plan_ms,
        tofu_show_ms = timings.tofu_show_ms,
        comment_list_ms = timings.comment_list_ms,
        comment_upsert_ms = timings.comment_upsert_ms,
        duration_ms = timings.total_ms,
        "Completed"
    );
    Ok(PlanReport { plan_succeeded, comment_id, first_total_ms, timings })
}

async fn upsert(
    github: &GitHub,
    timings: &mut Timings,
    request: &WorkRequest,
    existing: Option<CommentId>,
    body: &str,
    deadline: &Deadline,
) -> Option<CommentId> {
    let number = request.pull_request.number;
    match timed(
        timings,
        Stage::CommentUpsert,
        github.upsert_comment(number, existing, body, deadline),
    )
    .await
    {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::error!(
                request_id = %request.request_id,
                existing = existing.map(|id| id.0),
                error = format!("{e:#}"),
                "Comment failed"
            );
            None
        }
    }
}
