//! Reflexion pattern: bounded retries with self-critique between attempts.
//!
//! Each attempt is a full ReAct run. When an attempt fails the success
//! check, the oracle is asked to reflect on what went wrong, and the next
//! attempt sees every earlier attempt and reflection as context (most
//! recent first). History is never truncated; `max_attempts` bounds it.
//!
//! Exhausting the budget is not an error: the outcome carries
//! [`ReflexionStatus::BudgetExhausted`] and the last attempt's result.
//! Cancellation between attempts likewise returns the history so far with
//! [`ReflexionStatus::Cancelled`].

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use taskweave_config::OrchestratorConfig;
use taskweave_core::error::{Error, OracleError, Result};
use taskweave_core::event::{DomainEvent, EventBus};
use taskweave_core::oracle::ReflectionRequest;
use taskweave_core::tool::ToolCall;
use taskweave_core::turn::ConversationState;
use tracing::{debug, info, warn};

use super::react::IterationController;

/// Predicate deciding whether an attempt's result is acceptable.
pub type SuccessCheck<'a> = &'a (dyn Fn(&str) -> bool + Send + Sync);

#[derive(Debug, Clone)]
pub struct ReflexionOptions {
    /// Iteration budget for each attempt
    pub attempt_max_iterations: usize,
    /// Timeout for each reflect call
    pub reflect_timeout: Duration,
}

impl Default for ReflexionOptions {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for ReflexionOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            attempt_max_iterations: config.reflexion.attempt_max_iterations,
            reflect_timeout: Duration::from_secs(config.iteration.oracle_timeout_secs),
        }
    }
}

/// One pass through the task.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    /// 1-based attempt number
    pub number: usize,
    /// Summaries of the tool calls made, in order
    pub action_log: Vec<String>,
    pub result: String,
    pub success: bool,
    /// Critique produced after a failed attempt
    pub reflection: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflexionStatus {
    Succeeded,
    BudgetExhausted,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReflexionOutcome {
    pub status: ReflexionStatus,
    /// Result of the successful attempt, or of the last finished one otherwise
    pub result: String,
    pub attempts: Vec<Attempt>,
}

impl ReflexionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ReflexionStatus::Succeeded
    }
}

/// Wraps a single task in a bounded retry loop.
pub struct ReflexionController {
    controller: IterationController,
    options: ReflexionOptions,
    event_bus: Arc<EventBus>,
}

impl ReflexionController {
    pub fn new(controller: IterationController) -> Self {
        let event_bus = controller.event_bus().clone();
        Self {
            controller,
            options: ReflexionOptions::default(),
            event_bus,
        }
    }

    pub fn with_options(mut self, options: ReflexionOptions) -> Self {
        self.options = options;
        self
    }

    /// Attempt `goal` up to `max_attempts` times (at least once).
    ///
    /// Without a `success_check`, an attempt succeeds when its run produced
    /// a final answer. A run that exhausts its iteration budget counts as a
    /// failed attempt. A cancelled run ends the loop with the attempts
    /// finished so far; any other run error is returned as-is.
    pub async fn run(
        &self,
        goal: &str,
        max_attempts: usize,
        success_check: Option<SuccessCheck<'_>>,
    ) -> Result<ReflexionOutcome> {
        let max_attempts = max_attempts.max(1);
        let max_iterations = self.options.attempt_max_iterations;
        let mut history: Vec<Attempt> = Vec::with_capacity(max_attempts);

        info!(max_attempts, "Reflexion starting");

        for number in 1..=max_attempts {
            let context = render_history(&history);

            let (result, action_log, completed) = match self
                .controller
                .run_with_context(&context, goal, max_iterations)
                .await
            {
                Ok(outcome) => (outcome.answer, action_log(&outcome.conversation), true),
                Err(Error::MaxIterationsExceeded {
                    iterations,
                    conversation,
                }) => {
                    let result = conversation
                        .last_oracle_text()
                        .filter(|text| !text.is_empty())
                        .unwrap_or_else(|| format!("No answer within {iterations} iterations"));
                    (result, action_log(&conversation), false)
                }
                Err(Error::Cancelled { .. }) => {
                    warn!(attempt = number, "Reflexion cancelled");
                    return Ok(finish(ReflexionStatus::Cancelled, history));
                }
                Err(e) => return Err(e),
            };

            let success = completed && success_check.is_none_or(|check| check(&result));
            info!(attempt = number, success, "Reflexion attempt finished");
            self.event_bus.publish(DomainEvent::AttemptFinished {
                attempt: number,
                success,
                timestamp: Utc::now(),
            });

            if success {
                history.push(Attempt {
                    number,
                    action_log,
                    result: result.clone(),
                    success,
                    reflection: None,
                });
                return Ok(ReflexionOutcome {
                    status: ReflexionStatus::Succeeded,
                    result,
                    attempts: history,
                });
            }

            let reflection = self.reflect(goal, &action_log, &result).await;

            history.push(Attempt {
                number,
                action_log,
                result,
                success,
                reflection,
            });
        }

        warn!(attempts = history.len(), "Reflexion budget exhausted");
        Ok(finish(ReflexionStatus::BudgetExhausted, history))
    }

    /// Ask the oracle for a critique. A failed reflect call leaves the
    /// attempt without one.
    async fn reflect(&self, goal: &str, action_log: &[String], result: &str) -> Option<String> {
        let request = ReflectionRequest {
            task: goal.to_string(),
            action_log: action_log.to_vec(),
            result: result.to_string(),
        };
        let timeout = self.options.reflect_timeout;
        let outcome = match tokio::time::timeout(
            timeout,
            self.controller.oracle().reflect(&request),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(OracleError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(reflection) => {
                debug!(reflection = %reflection, "Reflection generated");
                Some(reflection)
            }
            Err(e) => {
                warn!("Reflection failed: {e}");
                self.event_bus.publish(DomainEvent::ErrorOccurred {
                    context: "reflect".into(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                None
            }
        }
    }
}

/// A non-success outcome carrying the last finished attempt's result.
fn finish(status: ReflexionStatus, attempts: Vec<Attempt>) -> ReflexionOutcome {
    let result = attempts
        .last()
        .map(|attempt| attempt.result.clone())
        .unwrap_or_default();
    ReflexionOutcome {
        status,
        result,
        attempts,
    }
}

fn action_log(conversation: &ConversationState) -> Vec<String> {
    conversation.tool_calls().map(ToolCall::summary).collect()
}

/// Earlier attempts as a single context entry, most recent first.
fn render_history(history: &[Attempt]) -> Vec<String> {
    if history.is_empty() {
        return Vec::new();
    }
    let mut text = String::from("Previous attempts at this task (most recent first):");
    for attempt in history.iter().rev() {
        text.push_str(&format!("\n\nAttempt {}:", attempt.number));
        if attempt.action_log.is_empty() {
            text.push_str("\nActions: none");
        } else {
            text.push_str(&format!("\nActions: {}", attempt.action_log.join("; ")));
        }
        text.push_str(&format!("\nResult: {}", attempt.result));
        if let Some(reflection) = &attempt.reflection {
            text.push_str(&format!("\nReflection: {reflection}"));
        }
    }
    vec![text]
}
