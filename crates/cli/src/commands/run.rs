//! `taskweave run`: Run a goal against a scripted oracle.

use std::path::Path;
use std::sync::Arc;
use taskweave_agent::{IterationOutcome, Orchestrator, ReflexionOutcome, ScheduleReport, SuccessCheck};
use taskweave_config::OrchestratorConfig;
use taskweave_core::event::EventBus;
use taskweave_core::turn::{ConversationState, TurnRole};
use tracing::info;

use crate::script::{Script, ScriptedOracle};
use crate::tools::builtin_registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// A single decide → act → observe loop
    Direct,
    /// Plan once, then run every task in dependency order
    Plan,
    /// Retry with reflections until the result passes
    Reflexion,
}

pub async fn run(
    mode: Mode,
    script_path: &Path,
    goal: &str,
    expect: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = OrchestratorConfig::load()?;
    let script = Script::load(script_path)?;
    info!(?mode, script = %script_path.display(), "Starting run");

    let orchestrator = Orchestrator::new(
        Arc::new(ScriptedOracle::new(script)),
        Arc::new(builtin_registry()),
        config,
        Arc::new(EventBus::default()),
    );

    // Ctrl-C stops dispatching new work
    let token = orchestrator.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    match mode {
        Mode::Direct => match orchestrator.run_direct(goal).await {
            Ok(outcome) => print_direct(&outcome, json)?,
            Err(e) => {
                if let Some(conversation) = e.conversation()
                    && !json
                {
                    println!("Partial conversation:");
                    print_conversation(conversation);
                }
                println!("❌ {e}");
                return Err(e.into());
            }
        },
        Mode::Plan => {
            let report = orchestrator.run_planned(goal).await?;
            print_plan(&report, json)?;
            if !report.success {
                return Err("one or more tasks failed".into());
            }
        }
        Mode::Reflexion => {
            let check = expect
                .as_deref()
                .map(|needle| move |result: &str| result.contains(needle));
            let check: Option<SuccessCheck<'_>> = match &check {
                Some(check) => Some(check),
                None => None,
            };
            let outcome = orchestrator.run_reflexion(goal, check).await?;
            print_reflexion(&outcome, json)?;
            if !outcome.is_success() {
                return Err("reflection budget exhausted".into());
            }
        }
    }

    Ok(())
}

fn print_direct(outcome: &IterationOutcome, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        let value = serde_json::json!({
            "mode": "direct",
            "answer": outcome.answer,
            "iterations": outcome.iterations,
            "tool_calls": outcome.tool_calls_made,
            "conversation": outcome.conversation,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    print_conversation(&outcome.conversation);
    println!();
    println!("✅ {}", outcome.answer);
    println!(
        "   {} iterations, {} tool calls",
        outcome.iterations, outcome.tool_calls_made
    );
    Ok(())
}

fn print_plan(report: &ScheduleReport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        let value = serde_json::json!({
            "mode": "plan",
            "success": report.success,
            "cancelled": report.cancelled,
            "tasks": report.tasks(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for task in report.tasks() {
        let marker = if task.result().is_some() { "✅" } else { "❌" };
        println!("{marker} [{}] {}", task.id(), task.description());
        match (task.result(), task.failure()) {
            (Some(result), _) => println!("     {result}"),
            (None, Some(failure)) => println!("     {failure}"),
            (None, None) => {}
        }
    }
    if report.cancelled {
        println!();
        println!("⚠️  Cancelled before every task ran");
    }
    Ok(())
}

fn print_reflexion(outcome: &ReflexionOutcome, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    for attempt in &outcome.attempts {
        let marker = if attempt.success { "✅" } else { "❌" };
        println!("{marker} Attempt {}: {}", attempt.number, attempt.result);
        for action in &attempt.action_log {
            println!("     → {action}");
        }
        if let Some(reflection) = &attempt.reflection {
            println!("     💭 {reflection}");
        }
    }
    Ok(())
}

fn print_conversation(conversation: &ConversationState) {
    for turn in conversation.snapshot() {
        let label = match turn.role {
            TurnRole::User => "user",
            TurnRole::Oracle => "oracle",
            TurnRole::ToolResult => "tool",
        };
        let text = turn.text();
        if !text.is_empty() {
            let marker = if turn.is_error { " (error)" } else { "" };
            println!("  {label}{marker}: {text}");
        }
        for call in &turn.tool_calls {
            println!("  {label} → {}", call.summary());
        }
    }
}
