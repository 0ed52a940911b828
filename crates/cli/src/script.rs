//! Scripted oracle: replays decisions from a JSON file.
//!
//! ```json
//! {
//!   "plan": [{ "description": "find X", "dependencies": [] }],
//!   "decisions": {
//!     "find X": [{ "tool_calls": [{ "name": "echo", "arguments": { "text": "X" } }] },
//!                { "final_answer": "X found" }],
//!     "*": [{ "final_answer": "fallback" }]
//!   },
//!   "reflections": ["look harder"]
//! }
//! ```
//!
//! Decisions are keyed by the most recent user turn (the goal or task
//! description). The `"*"` key applies to any goal without its own entry.
//! Each goal's script is consumed in order; running out is an oracle error.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use taskweave_core::error::OracleError;
use taskweave_core::oracle::{Decision, DecisionOracle, ReflectionRequest, TaskDescriptor};
use taskweave_core::tool::ToolSpec;
use taskweave_core::turn::{Turn, TurnRole};

const FALLBACK_KEY: &str = "*";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub plan: Vec<TaskDescriptor>,
    #[serde(default)]
    pub decisions: HashMap<String, Vec<Decision>>,
    #[serde(default)]
    pub reflections: Vec<String>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read script {}: {e}", path.display()))?;
        let script = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse script {}: {e}", path.display()))?;
        Ok(script)
    }
}

pub struct ScriptedOracle {
    script: Script,
    cursors: Mutex<HashMap<String, usize>>,
    reflections_used: Mutex<usize>,
}

impl ScriptedOracle {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            cursors: Mutex::new(HashMap::new()),
            reflections_used: Mutex::new(0),
        }
    }

    fn lock_err<T>(_: T) -> OracleError {
        OracleError::Unavailable("script state poisoned".into())
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "script"
    }

    async fn decide(&self, turns: &[Turn], _tools: &[ToolSpec]) -> Result<Decision, OracleError> {
        let goal = turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::User)
            .map(Turn::text)
            .ok_or_else(|| OracleError::MalformedResponse("conversation has no user turn".into()))?;

        let key = if self.script.decisions.contains_key(&goal) {
            goal
        } else {
            FALLBACK_KEY.to_string()
        };
        let Some(decisions) = self.script.decisions.get(&key) else {
            return Err(OracleError::Unavailable(format!(
                "no scripted decisions for '{key}'"
            )));
        };

        let mut cursors = self.cursors.lock().map_err(Self::lock_err)?;
        let position = cursors.entry(key.clone()).or_insert(0);
        let decision = decisions.get(*position).cloned().ok_or_else(|| {
            OracleError::Unavailable(format!("script for '{key}' exhausted after {position} decisions"))
        })?;
        *position += 1;
        Ok(decision)
    }

    async fn plan(&self, _goal: &str, _tools: &[ToolSpec]) -> Result<Vec<TaskDescriptor>, OracleError> {
        if self.script.plan.is_empty() {
            return Err(OracleError::Unavailable("script has no plan".into()));
        }
        Ok(self.script.plan.clone())
    }

    async fn reflect(&self, _request: &ReflectionRequest) -> Result<String, OracleError> {
        let mut used = self.reflections_used.lock().map_err(Self::lock_err)?;
        let reflection = self
            .script
            .reflections
            .get(*used)
            .cloned()
            .ok_or_else(|| OracleError::Unavailable("no more scripted reflections".into()))?;
        *used += 1;
        Ok(reflection)
    }
}
