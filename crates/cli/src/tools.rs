//! Built-in tools available to scripted runs.

use async_trait::async_trait;
use taskweave_core::error::ToolError;
use taskweave_core::tool::{Tool, ToolArguments, ToolRegistry};

/// Registry with every built-in tool.
pub fn builtin_registry() -> ToolRegistry {
    ToolRegistry::new().with(EchoTool).with(CalculatorTool)
}

fn string_arg<'a>(arguments: &'a ToolArguments, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given text unchanged."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError> {
        string_arg(arguments, "text").map(str::to_string)
    }
}

/// Evaluates arithmetic with `+ - * /`, parentheses, and unary minus.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression such as '(2 + 3) * 4'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": { "type": "string", "description": "Expression to evaluate" }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError> {
        let expression = string_arg(arguments, "expression")?;
        let value = evaluate(expression).map_err(|reason| ToolError::ExecutionFailed {
            tool_name: "calculator".into(),
            reason,
        })?;
        if value.fract() == 0.0 && value.abs() < 1e15 {
            Ok(format!("{}", value as i64))
        } else {
            Ok(value.to_string())
        }
    }
}

// ── Expression evaluation ──

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let mut cursor = Cursor {
        bytes: expression.as_bytes(),
        pos: 0,
    };
    let value = cursor.sum()?;
    cursor.skip_whitespace();
    if cursor.pos < cursor.bytes.len() {
        return Err(format!(
            "Unexpected '{}' at position {}",
            cursor.bytes[cursor.pos] as char, cursor.pos
        ));
    }
    Ok(value)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: u8) -> bool {
        self.skip_whitespace();
        if self.bytes.get(self.pos) == Some(&expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // sum = product (('+' | '-') product)*
    fn sum(&mut self) -> Result<f64, String> {
        let mut value = self.product()?;
        loop {
            if self.eat(b'+') {
                value += self.product()?;
            } else if self.eat(b'-') {
                value -= self.product()?;
            } else {
                return Ok(value);
            }
        }
    }

    // product = unary (('*' | '/') unary)*
    fn product(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        loop {
            if self.eat(b'*') {
                value *= self.unary()?;
            } else if self.eat(b'/') {
                let divisor = self.unary()?;
                if divisor == 0.0 {
                    return Err("Division by zero".into());
                }
                value /= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    // unary = '-' unary | atom
    fn unary(&mut self) -> Result<f64, String> {
        if self.eat(b'-') {
            return Ok(-self.unary()?);
        }
        self.atom()
    }

    // atom = number | '(' sum ')'
    fn atom(&mut self) -> Result<f64, String> {
        if self.eat(b'(') {
            let value = self.sum()?;
            if !self.eat(b')') {
                return Err("Missing closing parenthesis".into());
            }
            return Ok(value);
        }

        self.skip_whitespace();
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_digit() || *b == b'.')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(match self.bytes.get(self.pos) {
                Some(b) => format!("Unexpected '{}' at position {}", *b as char, self.pos),
                None => "Unexpected end of expression".into(),
            });
        }
        let literal = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|e| e.to_string())?;
        literal
            .parse()
            .map_err(|_| format!("Invalid number: {literal}"))
    }
}
