pub mod command;
pub mod plan;
pub mod workspace;

use std::path::PathBuf;

use anyhow::Result;
use plan_runner_core::{
    config::RunnerConfig, deadline::Deadline, models::PlanResult, models::WorkRequest,
    timings::Timings,
};

/// Runs git and the planning tool for one request at a time.
#[derive(Debug, Clone)]
pub struct Executor {
    git: PathBuf,
    tofu: PathBuf,
    workspace_root: Option<PathBuf>,
}

impl Executor {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            git: config.git.clone(),
            tofu: config.tofu.clone(),
            workspace_root: config.workspace_root.clone(),
        }
    }

    /// Materialize the request's commit and plan it. The workspace is removed before
    /// returning, whatever the outcome.
    pub async fn clone_and_plan(
        &self,
        request: &WorkRequest,
        deadline: &Deadline,
        timings: &mut Timings,
    ) -> Result<PlanResult> {
        let workspace = self.materialize(request, deadline, timings).await?;
        let result = self.plan(&workspace, deadline, timings).await;
        workspace.discard().await;
        result
    }
}
