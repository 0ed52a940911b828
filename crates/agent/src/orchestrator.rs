//! Orchestrator: wires the three execution modes from one configuration.
//!
//! - `run_direct`: a single ReAct run
//! - `run_planned`: plan once, then schedule the task graph
//! - `run_reflexion`: ReAct attempts with reflections in between
//!
//! All modes share the same oracle, tool invoker, event bus, and
//! cancellation token.

use std::sync::Arc;
use taskweave_config::OrchestratorConfig;
use taskweave_core::error::Result;
use taskweave_core::event::EventBus;
use taskweave_core::oracle::DecisionOracle;
use taskweave_core::tool::ToolInvoker;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::patterns::{
    IterationController, IterationOptions, IterationOutcome, PlanGraph, ReflexionController,
    ReflexionOptions, ReflexionOutcome, ScheduleReport, Scheduler, SchedulerOptions, SuccessCheck,
};

pub struct Orchestrator {
    controller: IterationController,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        oracle: Arc<dyn DecisionOracle>,
        tools: Arc<dyn ToolInvoker>,
        config: OrchestratorConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let controller = IterationController::new(oracle, tools, event_bus)
            .with_options(IterationOptions::from(&config.iteration))
            .with_cancellation(cancel.clone());
        Self {
            controller,
            config,
            cancel,
        }
    }

    /// Use `token` to cancel runs started by this orchestrator.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.controller = self.controller.with_cancellation(token.clone());
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        self.controller.event_bus()
    }

    /// Run `goal` as a single ReAct loop.
    pub async fn run_direct(&self, goal: &str) -> Result<IterationOutcome> {
        info!(mode = "direct", "Orchestrating goal");
        self.controller
            .run(goal, self.config.iteration.max_iterations)
            .await
    }

    /// Ask the oracle for a plan and validate it without running it.
    pub async fn plan(&self, goal: &str) -> Result<PlanGraph> {
        self.scheduler().plan(goal).await
    }

    /// Plan `goal` and run every task in dependency order.
    pub async fn run_planned(&self, goal: &str) -> Result<ScheduleReport> {
        info!(mode = "plan", "Orchestrating goal");
        self.scheduler().run(goal).await
    }

    /// Run `goal` with reflection-based retries.
    pub async fn run_reflexion(
        &self,
        goal: &str,
        success_check: Option<SuccessCheck<'_>>,
    ) -> Result<ReflexionOutcome> {
        info!(mode = "reflexion", "Orchestrating goal");
        ReflexionController::new(self.controller.clone())
            .with_options(ReflexionOptions::from(&self.config))
            .run(goal, self.config.reflexion.max_attempts, success_check)
            .await
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.controller.clone())
            .with_options(SchedulerOptions::from(&self.config))
            .with_cancellation(self.cancel.clone())
    }
}
