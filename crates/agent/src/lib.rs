//! The orchestration engine of taskweave.
//!
//! Three controllers drive work against an injected [`DecisionOracle`] and
//! [`ToolInvoker`]:
//!
//! 1. [`IterationController`] runs one task as a decide → act → observe loop
//! 2. [`Scheduler`] asks for a plan, validates it as a [`PlanGraph`], and
//!    runs each task as its own loop in dependency order
//! 3. [`ReflexionController`] retries one task, reflecting on each failure
//!
//! [`Orchestrator`] wires all three from one configuration.
//!
//! [`DecisionOracle`]: taskweave_core::DecisionOracle
//! [`ToolInvoker`]: taskweave_core::ToolInvoker

pub mod orchestrator;
pub mod patterns;

pub use orchestrator::Orchestrator;
pub use patterns::{
    Attempt, IterationController, IterationOptions, IterationOutcome, PlanGraph,
    ReflexionController, ReflexionOptions, ReflexionOutcome, ReflexionStatus, ScheduleReport,
    Scheduler, SchedulerOptions, SuccessCheck, Task, TaskFailure, TaskStatus,
};
