use std::{fmt, future::Future, time::Duration};

use time::OffsetDateTime;
use tokio::time::Instant;

/// Per-stage durations for a single request, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Timings {
    pub queue_to_runner_ms: u64,
    pub git_fetch_ms: u64,
    pub git_checkout_ms: u64,
    pub tofu_init_ms: u64,
    pub tofu_plan_ms: u64,
    pub tofu_show_ms: u64,
    pub comment_list_ms: u64,
    /// Cumulative across both publish passes.
    pub comment_upsert_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Stage {
    QueueToRunner,
    GitFetch,
    GitCheckout,
    TofuInit,
    TofuPlan,
    TofuShow,
    CommentList,
    CommentUpsert,
}

impl Stage {
    /// Rendering order of the timings line.
    pub const ALL: [Stage; 8] = [
        Self::QueueToRunner,
        Self::GitFetch,
        Self::GitCheckout,
        Self::TofuInit,
        Self::TofuPlan,
        Self::TofuShow,
        Self::CommentList,
        Self::CommentUpsert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueToRunner => "queue→runner",
            Self::GitFetch => "git.fetch",
            Self::GitCheckout => "git.checkout",
            Self::TofuInit => "tofu.init",
            Self::TofuPlan => "tofu.plan",
            Self::TofuShow => "tofu.show",
            Self::CommentList => "comment.list",
            Self::CommentUpsert => "comment.upsert",
        }
    }
}

impl Timings {
    pub fn get(&self, stage: Stage) -> u64 {
        match stage {
            Stage::QueueToRunner => self.queue_to_runner_ms,
            Stage::GitFetch => self.git_fetch_ms,
            Stage::GitCheckout => self.git_checkout_ms,
            Stage::TofuInit => self.tofu_init_ms,
            Stage::TofuPlan => self.tofu_plan_ms,
            Stage::TofuShow => self.tofu_show_ms,
            Stage::CommentList => self.comment_list_ms,
            Stage::CommentUpsert => self.comment_upsert_ms,
        }
    }

    pub fn add(&mut self, stage: Stage, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let field = match stage {
            Stage::QueueToRunner => &mut self.queue_to_runner_ms,
            Stage::GitFetch => &mut self.git_fetch_ms,
            Stage::GitCheckout => &mut self.git_checkout_ms,
            Stage::TofuInit => &mut self.tofu_init_ms,
            Stage::TofuPlan => &mut self.tofu_plan_ms,
            Stage::TofuShow => &mut self.tofu_show_ms,
            Stage::CommentList => &mut self.comment_list_ms,
            Stage::CommentUpsert => &mut self.comment_upsert_ms,
        };
        *field = field.saturating_add(ms);
    }

    /// Record the delay between the message being published and now.
    /// Clock skew that puts the publish time in the future counts as zero.
    pub fn record_queue_latency(&mut self, published: OffsetDateTime, now: OffsetDateTime) {
        let latency = (now - published).try_into().unwrap_or(Duration::ZERO);
        self.add(Stage::QueueToRunner, latency);
    }

    /// Overwrite the total with the time elapsed since `received`.
    pub fn finish(&mut self, received: Instant) {
        self.total_ms = u64::try_from(received.elapsed().as_millis()).unwrap_or(u64::MAX);
    }
}

impl fmt::Display for Timings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Timings (ms): ")?;
        for stage in Stage::ALL {
            write!(f, "{}={}, ", stage.as_str(), self.get(stage))?;
        }
        write!(f, "total={}", self.total_ms)
    }
}

/// Await `fut` and add its wall-clock duration to `stage`, whatever the outcome.
pub async fn timed<T>(timings: &mut Timings, stage: Stage, fut: impl Future<Output = T>) -> T {
    let start = Instant::now();
    let result = fut.await;
    timings.add(stage, start.elapsed());
    result
}
