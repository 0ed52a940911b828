//! `taskweave validate-plan`: Check a plan without running it.
//!
//! Accepts a full script (its `plan` field) or plain plan text, as an
//! oracle adapter would receive it.

use std::path::Path;
use taskweave_agent::PlanGraph;
use taskweave_core::oracle::TaskDescriptor;

use crate::script::Script;

pub async fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating plan in {}...", path.display());

    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let descriptors = match serde_json::from_str::<Script>(&content) {
        Ok(script) if !script.plan.is_empty() => script.plan,
        _ => TaskDescriptor::parse_list(&content)?,
    };

    match PlanGraph::from_descriptors("validate-plan", descriptors) {
        Ok(plan) => {
            println!("   ✅ {} tasks, no cycles", plan.len());
            println!();
            for (step, &id) in plan.topological_order().iter().enumerate() {
                let task = &plan.tasks()[id];
                let deps = if task.dependencies().is_empty() {
                    String::new()
                } else {
                    format!(" (after {:?})", task.dependencies())
                };
                println!("   {}. [{}] {}{}", step + 1, id, task.description(), deps);
            }
            Ok(())
        }
        Err(e) => {
            println!("   ❌ {e}");
            Err(e.into())
        }
    }
}
