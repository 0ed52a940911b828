//! Plan scheduler: executes a validated [`PlanGraph`] in dependency order.
//!
//! One planning call produces the graph; each task then runs as its own
//! [`IterationController`] sub-run, seeded with the results of its completed
//! dependencies. Independent tasks run concurrently up to a fixed limit.
//!
//! The scheduling loop is the only writer of task state. Sub-runs are
//! spawned into a `JoinSet` and report back through it, so no lock guards
//! the graph.
//!
//! A task whose dependency failed is failed immediately without running.
//! If no task is running and none can become ready, the remaining tasks
//! are marked deadlocked and the loop ends instead of polling forever.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use taskweave_config::OrchestratorConfig;
use taskweave_core::error::{Error, OracleError, Result};
use taskweave_core::event::{DomainEvent, EventBus};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::plan_graph::{PlanGraph, Task, TaskFailure, TaskStatus};
use super::react::{IterationController, IterationOutcome};

/// Limits applied while scheduling a plan.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum number of sub-runs in flight
    pub concurrency: usize,
    /// Iteration budget for each sub-run
    pub task_max_iterations: usize,
    /// Wall-clock limit for each sub-run
    pub task_timeout: Duration,
    /// Timeout for the planning call
    pub plan_timeout: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for SchedulerOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            concurrency: config.scheduler.concurrency,
            task_max_iterations: config.scheduler.task_max_iterations,
            task_timeout: Duration::from_secs(config.scheduler.task_timeout_secs),
            plan_timeout: Duration::from_secs(config.iteration.oracle_timeout_secs),
        }
    }
}

/// Final state of a scheduled plan.
#[derive(Debug, Clone)]
pub struct ScheduleReport {
    /// The plan with every task in a terminal state.
    pub plan: PlanGraph,
    /// True only if every task completed.
    pub success: bool,
    /// True if cancellation stopped dispatching.
    pub cancelled: bool,
}

impl ScheduleReport {
    /// Tasks in plan order.
    pub fn tasks(&self) -> &[Task] {
        self.plan.tasks()
    }

    pub fn failed(&self) -> impl Iterator<Item = &Task> {
        self.plan
            .tasks()
            .iter()
            .filter(|t| t.status() == TaskStatus::Failed)
    }

    /// Results of completed tasks joined in plan order.
    pub fn summary(&self) -> String {
        self.plan
            .tasks()
            .iter()
            .map(|t| match (t.result(), t.failure()) {
                (Some(result), _) => format!("[{}] {}: {}", t.id(), t.description(), result),
                (None, Some(failure)) => {
                    format!("[{}] {}: FAILED ({failure})", t.id(), t.description())
                }
                (None, None) => format!("[{}] {}: {}", t.id(), t.description(), t.status()),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

type SubRunResult = std::result::Result<Result<IterationOutcome>, tokio::time::error::Elapsed>;

/// Plans a goal and executes the resulting task graph.
pub struct Scheduler {
    controller: IterationController,
    options: SchedulerOptions,
    event_bus: Arc<EventBus>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler whose sub-runs use `controller`.
    ///
    /// Sub-runs ignore the controller's own cancellation token; use
    /// [`Scheduler::with_cancellation`] to stop dispatching new tasks.
    pub fn new(controller: IterationController) -> Self {
        let event_bus = controller.event_bus().clone();
        Self {
            controller: controller.detached(),
            options: SchedulerOptions::default(),
            event_bus,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Plan `goal` and execute the plan.
    pub async fn run(&self, goal: &str) -> Result<ScheduleReport> {
        let plan = self.plan(goal).await?;
        self.execute(plan).await
    }

    /// Ask the oracle for a plan and validate it.
    ///
    /// An invalid plan fails here, before any task runs.
    pub async fn plan(&self, goal: &str) -> Result<PlanGraph> {
        let oracle = self.controller.oracle();
        let timeout = self.options.plan_timeout;
        let descriptors = match tokio::time::timeout(
            timeout,
            oracle.plan(goal, self.controller.tool_specs()),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(OracleError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into());
            }
        };

        let plan = PlanGraph::from_descriptors(goal, descriptors).inspect_err(|e| {
            warn!("Rejected plan: {e}");
            self.event_bus.publish(DomainEvent::ErrorOccurred {
                context: "plan".into(),
                error_message: e.to_string(),
                timestamp: Utc::now(),
            });
        })?;

        info!(tasks = plan.len(), "Plan validated");
        self.event_bus.publish(DomainEvent::PlanValidated {
            task_count: plan.len(),
            timestamp: Utc::now(),
        });
        Ok(plan)
    }

    /// Execute a validated plan until every task is terminal.
    pub async fn execute(&self, mut plan: PlanGraph) -> Result<ScheduleReport> {
        let concurrency = self.options.concurrency.max(1);
        let mut running: JoinSet<SubRunResult> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, usize> = HashMap::new();

        info!(
            tasks = plan.len(),
            concurrency,
            "Scheduler starting"
        );

        loop {
            self.refresh(&mut plan)?;

            if !self.cancel.is_cancelled() {
                while running.len() < concurrency
                    && let Some(id) = plan.next_ready()
                {
                    self.start(&mut plan, &mut running, &mut in_flight, id)?;
                }
            }

            if running.is_empty() {
                if !plan.all_terminal() {
                    // Validated plans are acyclic and `refresh` fails every
                    // dependent of a failed task, so without cancellation
                    // this fallback never fires.
                    let failure = if self.cancel.is_cancelled() {
                        TaskFailure::Cancelled
                    } else {
                        TaskFailure::Deadlock
                    };
                    self.fail_remaining(&mut plan, failure)?;
                }
                break;
            }

            let Some(joined) = running.join_next_with_id().await else {
                continue;
            };
            match joined {
                Ok((task, outcome)) => {
                    let id = in_flight.remove(&task).ok_or_else(|| {
                        Error::Internal("finished sub-run has no task".into())
                    })?;
                    self.finish(&mut plan, id, outcome)?;
                }
                Err(join_error) => {
                    let id = in_flight.remove(&join_error.id()).ok_or_else(|| {
                        Error::Internal("failed sub-run has no task".into())
                    })?;
                    warn!(task = id, "Sub-run aborted: {join_error}");
                    self.fail(
                        &mut plan,
                        id,
                        TaskFailure::SubRun {
                            message: join_error.to_string(),
                        },
                    )?;
                }
            }
        }

        let success = plan.all_completed();
        let cancelled = self.cancel.is_cancelled();
        info!(success, cancelled, "Scheduler finished");
        Ok(ScheduleReport {
            plan,
            success,
            cancelled,
        })
    }

    // ── State transitions ──

    /// Promote pending tasks whose dependencies completed and fail those
    /// whose dependencies failed. Walks in topological order so a failure
    /// reaches the whole downstream chain in one pass.
    fn refresh(&self, plan: &mut PlanGraph) -> Result<()> {
        let order = plan.topological_order().to_vec();
        for id in order {
            let task = &plan.tasks()[id];
            if task.status() != TaskStatus::Pending {
                continue;
            }
            let failed_dependency = task
                .dependencies()
                .iter()
                .copied()
                .find(|&dep| plan.tasks()[dep].status() == TaskStatus::Failed);
            let ready = task
                .dependencies()
                .iter()
                .all(|&dep| plan.tasks()[dep].status() == TaskStatus::Completed);

            if let Some(dependency) = failed_dependency {
                self.fail(plan, id, TaskFailure::Dependency { dependency })?;
            } else if ready {
                self.set_status(plan, id, TaskStatus::Ready)?;
            }
        }
        Ok(())
    }

    fn start(
        &self,
        plan: &mut PlanGraph,
        running: &mut JoinSet<SubRunResult>,
        in_flight: &mut HashMap<tokio::task::Id, usize>,
        id: usize,
    ) -> Result<()> {
        self.set_status(plan, id, TaskStatus::Running)?;

        let controller = self.controller.clone();
        let context = plan.dependency_context(id);
        let description = plan.tasks()[id].description().to_string();
        let max_iterations = self.options.task_max_iterations;
        let timeout = self.options.task_timeout;

        debug!(task = id, context = context.len(), "Dispatching sub-run");
        let handle = running.spawn(async move {
            tokio::time::timeout(
                timeout,
                controller.run_with_context(&context, &description, max_iterations),
            )
            .await
        });
        in_flight.insert(handle.id(), id);
        Ok(())
    }

    fn finish(&self, plan: &mut PlanGraph, id: usize, outcome: SubRunResult) -> Result<()> {
        match outcome {
            Ok(Ok(outcome)) => {
                plan.complete(id, outcome.answer, outcome.iterations)?;
                self.publish_status(id, TaskStatus::Completed);
                info!(task = id, iterations = outcome.iterations, "Task completed");
                Ok(())
            }
            Ok(Err(Error::MaxIterationsExceeded { iterations, .. })) => {
                self.fail(plan, id, TaskFailure::MaxIterationsExceeded { iterations })
            }
            Ok(Err(e)) => self.fail(
                plan,
                id,
                TaskFailure::SubRun {
                    message: e.to_string(),
                },
            ),
            Err(_) => self.fail(
                plan,
                id,
                TaskFailure::Timeout {
                    timeout_ms: self.options.task_timeout.as_millis() as u64,
                },
            ),
        }
    }

    fn fail_remaining(&self, plan: &mut PlanGraph, failure: TaskFailure) -> Result<()> {
        let remaining: Vec<usize> = plan
            .tasks()
            .iter()
            .filter(|t| !t.status().is_terminal())
            .map(|t| t.id())
            .collect();
        if !remaining.is_empty() {
            warn!(tasks = ?remaining, "No runnable task left: {failure}");
        }
        for id in remaining {
            self.fail(plan, id, failure.clone())?;
        }
        Ok(())
    }

    fn fail(&self, plan: &mut PlanGraph, id: usize, failure: TaskFailure) -> Result<()> {
        warn!(task = id, "Task failed: {failure}");
        plan.fail(id, failure)?;
        self.publish_status(id, TaskStatus::Failed);
        Ok(())
    }

    fn set_status(&self, plan: &mut PlanGraph, id: usize, status: TaskStatus) -> Result<()> {
        plan.transition(id, status)?;
        debug!(task = id, status = %status, "Task status changed");
        self.publish_status(id, status);
        Ok(())
    }

    fn publish_status(&self, task_id: usize, status: TaskStatus) {
        self.event_bus.publish(DomainEvent::TaskStatusChanged {
            task_id,
            status: status.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::*;
    use taskweave_core::error::PlanError;
    use taskweave_core::oracle::{DecisionOracle, TaskDescriptor};

    fn task(description: &str, dependencies: Vec<usize>) -> TaskDescriptor {
        TaskDescriptor::new(description, dependencies)
    }

    fn options(concurrency: usize) -> SchedulerOptions {
        SchedulerOptions {
            concurrency,
            task_max_iterations: 3,
            task_timeout: Duration::from_secs(30),
            plan_timeout: Duration::from_secs(5),
        }
    }

    fn scheduler(oracle: Arc<dyn DecisionOracle>, bus: Arc<EventBus>) -> Scheduler {
        let controller = IterationController::new(oracle, Arc::new(test_registry()), bus);
        Scheduler::new(controller).with_options(options(2))
    }

    fn statuses(report: &ScheduleReport) -> Vec<TaskStatus> {
        report.tasks().iter().map(Task::status).collect()
    }

    #[tokio::test]
    async fn cyclic_plan_rejected_before_any_task_runs() {
        let oracle = Arc::new(KeyedMockOracle::new(vec![
            task("A", vec![1]),
            task("B", vec![0]),
        ]));
        let err = scheduler(oracle.clone(), Arc::new(EventBus::default()))
            .run("goal")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Plan(PlanError::Cyclic { .. })));
        assert!(oracle.started().is_empty());
    }

    #[tokio::test]
    async fn out_of_range_dependency_rejected() {
        let oracle = Arc::new(KeyedMockOracle::new(vec![task("A", vec![3])]));
        let err = scheduler(oracle.clone(), Arc::new(EventBus::default()))
            .run("goal")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Plan(PlanError::DependencyOutOfRange { dependency: 3, .. })
        ));
        assert!(oracle.started().is_empty());
    }

    #[tokio::test]
    async fn planning_unsupported_surfaces_oracle_error() {
        let oracle = Arc::new(SequentialMockOracle::new(vec![]));
        let err = scheduler(oracle, Arc::new(EventBus::default()))
            .run("goal")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Oracle(OracleError::Unavailable(_))));
    }

    #[tokio::test]
    async fn independent_tasks_all_complete() {
        let oracle = Arc::new(
            KeyedMockOracle::new(vec![task("A", vec![]), task("B", vec![])])
                .on("A", Behavior::Answer("alpha".into()))
                .on("B", Behavior::Answer("beta".into())),
        );
        let report = scheduler(oracle, Arc::new(EventBus::default()))
            .run("goal")
            .await
            .unwrap();

        assert!(report.success);
        assert!(!report.cancelled);
        assert_eq!(report.tasks()[0].result(), Some("alpha"));
        assert_eq!(report.tasks()[1].result(), Some("beta"));
        assert!(report.summary().contains("[1] B: beta"));
    }

    #[tokio::test]
    async fn dependent_runs_after_prerequisite_with_its_result() {
        let oracle = Arc::new(
            KeyedMockOracle::new(vec![task("B", vec![1]), task("A", vec![])])
                .on("A", Behavior::Answer("fact: water boils at 100C".into())),
        );
        let report = scheduler(oracle.clone(), Arc::new(EventBus::default()))
            .run("goal")
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(oracle.started(), vec!["A".to_string(), "B".to_string()]);
        let context = oracle.context_for("B");
        assert_eq!(context.len(), 1);
        assert!(context[0].contains("fact: water boils at 100C"));
        assert!(oracle.context_for("A").is_empty());
    }

    #[tokio::test]
    async fn failed_dependency_fails_dependent_without_running_it() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let oracle = Arc::new(
            KeyedMockOracle::new(vec![task("A", vec![]), task("B", vec![0])])
                .on("A", Behavior::Loop),
        );
        let report = scheduler(oracle.clone(), bus).run("goal").await.unwrap();

        assert!(!report.success);
        assert_eq!(statuses(&report), vec![TaskStatus::Failed, TaskStatus::Failed]);
        assert_eq!(
            report.tasks()[0].failure(),
            Some(&TaskFailure::MaxIterationsExceeded { iterations: 3 })
        );
        let failure = report.tasks()[1].failure().unwrap();
        assert_eq!(failure, &TaskFailure::Dependency { dependency: 0 });
        assert!(failure.to_string().contains("TaskDependencyError"));
        assert_eq!(oracle.started(), vec!["A".to_string()]);

        let mut b_statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::TaskStatusChanged { task_id: 1, status, .. } = event.as_ref() {
                b_statuses.push(status.clone());
            }
        }
        assert_eq!(b_statuses, vec!["failed".to_string()]);
    }

    #[tokio::test]
    async fn failure_propagates_down_the_chain() {
        let oracle = Arc::new(
            KeyedMockOracle::new(vec![
                task("A", vec![]),
                task("B", vec![0]),
                task("C", vec![1]),
                task("D", vec![]),
            ])
            .on("A", Behavior::Loop),
        );
        let report = scheduler(oracle, Arc::new(EventBus::default()))
            .run("goal")
            .await
            .unwrap();

        assert_eq!(
            report.tasks()[2].failure(),
            Some(&TaskFailure::Dependency { dependency: 1 })
        );
        assert_eq!(report.tasks()[3].status(), TaskStatus::Completed);
        assert_eq!(report.failed().count(), 3);
    }

    #[tokio::test]
    async fn diamond_runs_join_last() {
        let oracle = Arc::new(KeyedMockOracle::new(vec![
            task("A", vec![]),
            task("B", vec![0]),
            task("C", vec![0]),
            task("D", vec![1, 2]),
        ]));
        let report = scheduler(oracle.clone(), Arc::new(EventBus::default()))
            .run("goal")
            .await
            .unwrap();

        assert!(report.success);
        let started = oracle.started();
        assert_eq!(started.first().map(String::as_str), Some("A"));
        assert_eq!(started.last().map(String::as_str), Some("D"));
        let context = oracle.context_for("D");
        assert!(context[0].contains("done: B"));
        assert!(context[0].contains("done: C"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_limit_respected() {
        let plan: Vec<_> = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|name| task(name, vec![]))
            .collect();
        let mut oracle = KeyedMockOracle::new(plan);
        for name in ["A", "B", "C", "D", "E"] {
            oracle = oracle.on(
                name,
                Behavior::DelayedAnswer(Duration::from_secs(1), format!("{name} ok")),
            );
        }
        let oracle = Arc::new(oracle);
        let report = scheduler(oracle.clone(), Arc::new(EventBus::default()))
            .run("goal")
            .await
            .unwrap();

        assert!(report.success);
        assert!(oracle.peak_concurrency() <= 2, "peak {}", oracle.peak_concurrency());
        assert_eq!(oracle.started().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_and_parallel_agree() {
        let plan = vec![
            task("A", vec![]),
            task("B", vec![]),
            task("C", vec![0, 1]),
            task("D", vec![2]),
        ];
        let mut outcomes = Vec::new();
        for concurrency in [1, 3] {
            let oracle = Arc::new(
                KeyedMockOracle::new(plan.clone())
                    .on("A", Behavior::DelayedAnswer(Duration::from_millis(30), "a".into()))
                    .on("B", Behavior::Answer("b".into()))
                    .on("D", Behavior::Loop),
            );
            let controller = IterationController::new(
                oracle,
                Arc::new(test_registry()),
                Arc::new(EventBus::default()),
            );
            let report = Scheduler::new(controller)
                .with_options(options(concurrency))
                .run("goal")
                .await
                .unwrap();
            let summary: Vec<_> = report
                .tasks()
                .iter()
                .map(|t| (t.status(), t.result().map(String::from), t.failure().cloned()))
                .collect();
            outcomes.push(summary);
        }
        assert_eq!(outcomes[0], outcomes[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn sub_run_timeout_fails_task() {
        let oracle = Arc::new(
            KeyedMockOracle::new(vec![task("A", vec![])])
                .on("A", Behavior::DelayedAnswer(Duration::from_secs(20), "late".into())),
        );
        let controller = IterationController::new(
            oracle,
            Arc::new(test_registry()),
            Arc::new(EventBus::default()),
        );
        let report = Scheduler::new(controller)
            .with_options(SchedulerOptions {
                task_timeout: Duration::from_secs(1),
                ..options(1)
            })
            .run("goal")
            .await
            .unwrap();

        assert_eq!(
            report.tasks()[0].failure(),
            Some(&TaskFailure::Timeout { timeout_ms: 1000 })
        );
    }

    #[tokio::test]
    async fn cancelled_scheduler_starts_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let oracle = Arc::new(KeyedMockOracle::new(vec![
            task("A", vec![]),
            task("B", vec![0]),
        ]));
        let report = scheduler(oracle.clone(), Arc::new(EventBus::default()))
            .with_cancellation(token)
            .run("goal")
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(!report.success);
        assert!(oracle.started().is_empty());
        for task in report.tasks() {
            assert_eq!(task.failure(), Some(&TaskFailure::Cancelled));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_run_keeps_running_result() {
        let token = CancellationToken::new();
        let oracle = Arc::new(
            KeyedMockOracle::new(vec![task("A", vec![]), task("B", vec![]), task("C", vec![0])])
                .on("A", Behavior::DelayedAnswer(Duration::from_secs(1), "a-done".into())),
        );
        let scheduler = scheduler(oracle.clone(), Arc::new(EventBus::default()))
            .with_options(options(1))
            .with_cancellation(token.clone());

        let cancel_while_a_runs = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            token.cancel();
        };
        let (report, ()) = tokio::join!(scheduler.run("goal"), cancel_while_a_runs);
        let report = report.unwrap();

        assert!(report.cancelled);
        assert_eq!(oracle.started(), vec!["A".to_string()]);
        assert_eq!(report.tasks()[0].status(), TaskStatus::Completed);
        assert_eq!(report.tasks()[0].result(), Some("a-done"));
        for task in &report.tasks()[1..] {
            assert_eq!(task.status(), TaskStatus::Failed);
            assert_eq!(task.failure(), Some(&TaskFailure::Cancelled));
        }
    }

    #[tokio::test]
    async fn plan_validated_event_published() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let oracle = Arc::new(KeyedMockOracle::new(vec![task("A", vec![])]));
        scheduler(oracle, bus).run("goal").await.unwrap();

        let mut validated = None;
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::PlanValidated { task_count, .. } = event.as_ref() {
                validated = Some(*task_count);
            }
        }
        assert_eq!(validated, Some(1));
    }
}
