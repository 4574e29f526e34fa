use std::path::Path;

use anyhow::{Context, Result};
use plan_runner_core::{
    deadline::Deadline,
    models::PlanResult,
    timings::{Stage, Timings, timed},
};

use crate::{Executor, command::Cmd, workspace::Workspace};

/// Binary plan artifact written by `tofu plan` and read back by `tofu show`.
pub const PLAN_FILE: &str = "tfplan.bin";

impl Executor {
    fn tofu(&self, dir: &Path) -> Cmd {
        Cmd::new(&self.tofu, dir).env("TF_IN_AUTOMATION", "1")
    }

    /// Run `init`, `plan` and `show` in the workspace's work dir, returning the rendered plan.
    pub async fn plan(
        &self,
        workspace: &Workspace,
        deadline: &Deadline,
        timings: &mut Timings,
    ) -> Result<PlanResult> {
        let dir = workspace.work_dir();
        let init = self.tofu(dir).args(["init", "-input=false", "-no-color"]);
        timed(timings, Stage::TofuInit, init.run(deadline)).await.context("tofu init")?;

        let out = format!("-out={PLAN_FILE}");
        let plan = self.tofu(dir).args(["plan", "-input=false", "-no-color", out.as_str()]);
        timed(timings, Stage::TofuPlan, plan.run(deadline)).await.context("tofu plan")?;

        let show = self.tofu(dir).args(["show", "-no-color", PLAN_FILE]);
        let text = timed(timings, Stage::TofuShow, show.output(deadline))
            .await
            .context("tofu show")?;
        let result = PlanResult::new(text);
        if result.truncated {
            tracing::warn!("Plan output exceeded {} characters, truncated", PlanResult::MAX_CHARS);
        }
        Ok(result)
    }
}
