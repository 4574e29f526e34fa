use std::fmt::Write;

use plan_runner_core::{models::WorkRequest, timings::Timings};

pub const TITLE: &str = "Managed Runners (OpenTofu) Plan";

/// Invisible token identifying the sticky comment for one plan stream.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Marker(String);

impl Marker {
    pub const DEFAULT_PLAN_ID: &'static str = "default";

    pub fn for_plan(plan_id: &str) -> Self {
        let plan_id = if plan_id.is_empty() { Self::DEFAULT_PLAN_ID } else { plan_id };
        Self(format!("<!-- runners-poc:plan:{plan_id} -->"))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn is_in(&self, body: &str) -> bool { body.contains(&self.0) }
}

/// Render the sticky comment body. The timings line is only added when `timings` is set.
pub fn render_body(
    request: &WorkRequest,
    marker: &Marker,
    plan: &str,
    timings: Option<&Timings>,
) -> String {
    let mut out = String::with_capacity(plan.len() + 512);
    out.push_str(marker.as_str());
    out.push('\n');
    out.push_str(TITLE);
    out.push_str("\n\n");
    let _ = write!(out, "{} @ {}\n\n", request.repo.full_name, request.pull_request.head_sha);
    if let Some(dir) = request.work.subdir() {
        let _ = write!(out, "Dir: {dir}\n\n");
    }
    out.push_str("```\n");
    out.push_str(plan);
    if !plan.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("```\n");
    if let Some(timings) = timings {
        let _ = writeln!(out, "{timings}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &str) -> WorkRequest {
        let mut request = WorkRequest::default();
        request.repo.full_name = "acme/infra".to_string();
        request.pull_request.head_sha = "0123abcd".to_string();
        request.work.dir = dir.to_string();
        request
    }

    #[test]
    fn test_marker() {
        assert_eq!(Marker::for_plan("prod").as_str(), "<!-- runners-poc:plan:prod -->");
        assert_eq!(Marker::for_plan("prod"), Marker::for_plan("prod"));
        assert_eq!(Marker::for_plan(""), Marker::for_plan(Marker::DEFAULT_PLAN_ID));
        assert!(Marker::for_plan("prod").is_in("x\n<!-- runners-poc:plan:prod -->\ny"));
        assert!(!Marker::for_plan("prod").is_in("<!-- runners-poc:plan:staging -->"));
    }

    #[test]
    fn test_render_body() {
        let marker = Marker::for_plan("");
        let body = render_body(&request("."), &marker, "No changes.", None);
        assert_eq!(
            body,
            "<!-- runners-poc:plan:default -->\n\
             Managed Runners (OpenTofu) Plan\n\n\
             acme/infra @ 0123abcd\n\n\
             ```\nNo changes.\n```\n"
        );
    }

    #[test]
    fn test_render_body_with_dir_and_timings() {
        let marker = Marker::for_plan("prod");
        let timings = Timings { git_fetch_ms: 812, total_ms: 4051, ..Timings::default() };
        let body = render_body(&request("envs/prod"), &marker, "Plan: 1 to add.\n", Some(&timings));
        assert_eq!(
            body,
            "<!-- runners-poc:plan:prod -->\n\
             Managed Runners (OpenTofu) Plan\n\n\
             acme/infra @ 0123abcd\n\n\
             Dir: envs/prod\n\n\
             ```\nPlan: 1 to add.\n```\n\
             Timings (ms): queue→runner=0, git.fetch=812, git.checkout=0, tofu.init=0, \
             tofu.plan=0, tofu.show=0, comment.list=0, comment.upsert=0, total=4051\n"
        );
    }
}
