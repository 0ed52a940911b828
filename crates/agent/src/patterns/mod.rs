//! Orchestration patterns.
//!
//! 1. **ReAct**: decide → act → observe loop for a single task
//! 2. **Plan graph / scheduler**: dependency-ordered execution of a plan,
//!    one ReAct sub-run per task
//! 3. **Reflexion**: bounded retries with a reflection between attempts
//!
//! The scheduler and the reflexion controller both delegate to the ReAct
//! controller; neither talks to tools directly.

pub mod plan_graph;
pub mod react;
pub mod reflexion;
pub mod scheduler;

pub use plan_graph::{PlanGraph, Task, TaskFailure, TaskStatus};
pub use react::{IterationController, IterationOptions, IterationOutcome};
pub use reflexion::{
    Attempt, ReflexionController, ReflexionOptions, ReflexionOutcome, ReflexionStatus,
    SuccessCheck,
};
pub use scheduler::{ScheduleReport, Scheduler, SchedulerOptions};

#[cfg(test)]
pub(crate) mod test_helpers;
