mod plan;

use std::sync::Arc;

use plan_runner_core::config::Config;
use plan_runner_executor::Executor;
pub use plan::{PlanJob, PlanReport, process_plan_job};

/// Shared context available to all job handlers.
#[derive(Clone)]
pub struct JobContext {
    pub config: Arc<Config>,
    pub executor: Arc<Executor>,
}

impl JobContext {
    pub fn new(config: Arc<Config>) -> Self {
        let executor = Arc::new(Executor::new(&config.runner));
        Self { config, executor }
    }
}
