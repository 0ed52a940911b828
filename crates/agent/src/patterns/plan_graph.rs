//! Plan graph: the dependency DAG of sub-tasks derived from one planning call.
//!
//! Tasks live in a flat arena and refer to their dependencies by index.
//! A graph is validated once at construction (range check, then Kahn's
//! topological sort) and its shape never changes afterwards; only task
//! status, result, and failure reason mutate during scheduling.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use taskweave_core::error::{Error, PlanError, Result};
use taskweave_core::oracle::TaskDescriptor;

/// Lifecycle of a plan task.
///
/// Transitions are monotonic: `Pending → Ready → Running → {Completed | Failed}`.
/// A task that can no longer run (failed dependency, deadlock, cancellation)
/// moves to `Failed` from `Pending` or `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` respects the lifecycle.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Failed)
                | (Ready, Running)
                | (Ready, Failed)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFailure {
    #[error("sub-run exhausted its budget of {iterations} iterations")]
    MaxIterationsExceeded { iterations: usize },

    #[error("sub-run failed: {message}")]
    SubRun { message: String },

    #[error("TaskDependencyError: dependency task {dependency} failed")]
    Dependency { dependency: usize },

    #[error("TaskDependencyError: blocked with no runnable task left")]
    Deadlock,

    #[error("sub-run timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("cancelled before the task was started")]
    Cancelled,
}

impl TaskFailure {
    /// True for failures caused by the task's dependencies rather than its own run.
    pub fn is_dependency_error(&self) -> bool {
        matches!(self, Self::Dependency { .. } | Self::Deadlock)
    }
}

/// A single sub-task of a plan.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    id: usize,
    description: String,
    dependencies: Vec<usize>,
    status: TaskStatus,
    result: Option<String>,
    failure: Option<TaskFailure>,
    iterations: usize,
}

impl Task {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Dependency indices, sorted and de-duplicated.
    pub fn dependencies(&self) -> &[usize] {
        &self.dependencies
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        self.failure.as_ref()
    }

    /// Iterations used by the task's sub-run (0 if it never ran or failed).
    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

/// A validated, acyclic plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanGraph {
    goal: String,
    tasks: Vec<Task>,
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl PlanGraph {
    /// Build and validate a plan from oracle descriptors.
    ///
    /// Fails with [`PlanError::DependencyOutOfRange`] on a dangling index and
    /// [`PlanError::Cyclic`] when the graph has a cycle (a task depending on
    /// itself included). No task is ever created from an invalid plan.
    pub fn from_descriptors(
        goal: impl Into<String>,
        descriptors: Vec<TaskDescriptor>,
    ) -> std::result::Result<Self, PlanError> {
        let len = descriptors.len();
        if len == 0 {
            return Err(PlanError::Empty);
        }

        let mut tasks = Vec::with_capacity(len);
        let mut dependents = vec![Vec::new(); len];
        for (id, descriptor) in descriptors.into_iter().enumerate() {
            let mut dependencies = descriptor.dependencies;
            dependencies.sort_unstable();
            dependencies.dedup();
            for &dependency in &dependencies {
                if dependency >= len {
                    return Err(PlanError::DependencyOutOfRange {
                        task: id,
                        dependency,
                        len,
                    });
                }
                dependents[dependency].push(id);
            }
            tasks.push(Task {
                id,
                description: descriptor.description,
                dependencies,
                status: TaskStatus::Pending,
                result: None,
                failure: None,
                iterations: 0,
            });
        }

        let order = topological_sort(&tasks, &dependents)?;

        Ok(Self {
            goal: goal.into(),
            tasks,
            dependents,
            order,
        })
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: usize) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Dependency-respecting execution order; ties broken by index.
    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }

    /// Tasks that list `id` as a dependency.
    pub fn dependents(&self, id: usize) -> &[usize] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn all_completed(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    }

    /// The lowest-index task currently `Ready`.
    pub fn next_ready(&self) -> Option<usize> {
        self.tasks
            .iter()
            .find(|t| t.status == TaskStatus::Ready)
            .map(|t| t.id)
    }

    /// Descriptions and results of a task's completed dependencies.
    pub fn dependency_context(&self, id: usize) -> Vec<String> {
        let Some(task) = self.tasks.get(id) else {
            return Vec::new();
        };
        let lines: Vec<String> = task
            .dependencies
            .iter()
            .filter_map(|&dep| self.tasks.get(dep))
            .filter(|dep| dep.status == TaskStatus::Completed)
            .map(|dep| {
                format!(
                    "- [{}] {}: {}",
                    dep.id,
                    dep.description,
                    dep.result.as_deref().unwrap_or("")
                )
            })
            .collect();
        if lines.is_empty() {
            return Vec::new();
        }
        vec![format!(
            "Results of completed prerequisite tasks:\n{}",
            lines.join("\n")
        )]
    }

    // ── Mutation (scheduler only) ──

    pub(crate) fn transition(&mut self, id: usize, next: TaskStatus) -> Result<()> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::Internal(format!("no task with id {id}")))?;
        if !task.status.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "illegal status transition for task {id}: {} -> {next}",
                task.status
            )));
        }
        task.status = next;
        Ok(())
    }

    pub(crate) fn complete(&mut self, id: usize, result: String, iterations: usize) -> Result<()> {
        self.transition(id, TaskStatus::Completed)?;
        let task = &mut self.tasks[id];
        task.result = Some(result);
        task.iterations = iterations;
        Ok(())
    }

    pub(crate) fn fail(&mut self, id: usize, failure: TaskFailure) -> Result<()> {
        self.transition(id, TaskStatus::Failed)?;
        self.tasks[id].failure = Some(failure);
        Ok(())
    }
}

/// Kahn's algorithm; the ready set is ordered so ties go to the lowest index.
fn topological_sort(
    tasks: &[Task],
    dependents: &[Vec<usize>],
) -> std::result::Result<Vec<usize>, PlanError> {
    let mut in_degree: Vec<usize> = tasks.iter().map(|t| t.dependencies.len()).collect();
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(tasks.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < tasks.len() {
        let involved = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d > 0)
            .map(|(i, _)| i)
            .collect();
        return Err(PlanError::Cyclic { involved });
    }
    Ok(order)
}
