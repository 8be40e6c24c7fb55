//! Call validation: layered checks run before a call is dispatched.
//!
//! A rejected call never reaches hooks or the tool.

use serde_json::Value;

use crate::call::ToolCall;
use crate::tool::ToolSchemaInfo;

/// Result of a single rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(String),
}

/// What a rule sees: the call plus the schema of the tool it names, if any
pub struct ValidationContext<'a> {
    pub call: &'a ToolCall,
    pub schema: Option<&'a ToolSchemaInfo>,
}

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, ctx: &ValidationContext<'_>) -> Verdict;

    fn enabled(&self) -> bool {
        true
    }
}

/// Ordered rules, short-circuiting on the first rejection
pub struct CallValidator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl CallValidator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(mut self, rule: Box<dyn ValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// `Err(reason)` names the rejecting rule
    pub fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), String> {
        for rule in &self.rules {
            if !rule.enabled() {
                continue;
            }
            if let Verdict::Reject(reason) = rule.check(ctx) {
                tracing::warn!(
                    rule = rule.name(),
                    tool = %ctx.call.tool,
                    call_id = %ctx.call.id,
                    reason = %reason,
                    "Tool call rejected"
                );
                return Err(reason);
            }
        }
        Ok(())
    }
}

impl Default for CallValidator {
    /// Tool existence followed by input shape
    fn default() -> Self {
        Self::new()
            .add_rule(Box::new(ToolExistence))
            .add_rule(Box::new(InputShape))
    }
}

/// The named tool must be registered
pub struct ToolExistence;

impl ValidationRule for ToolExistence {
    fn name(&self) -> &str {
        "tool_existence"
    }

    fn check(&self, ctx: &ValidationContext<'_>) -> Verdict {
        match ctx.schema {
            Some(_) => Verdict::Accept,
            None => Verdict::Reject(format!("unknown tool: {}", ctx.call.tool)),
        }
    }
}

/// Input must be an object carrying every `required` field of the tool's
/// JSON schema, and declared properties must have the declared JSON type.
pub struct InputShape;

impl ValidationRule for InputShape {
    fn name(&self) -> &str {
        "input_shape"
    }

    fn check(&self, ctx: &ValidationContext<'_>) -> Verdict {
        let Some(schema) = ctx.schema else {
            return Verdict::Accept;
        };
        let params = &schema.parameters;
        let input = &ctx.call.input;

        let Some(fields) = input.as_object() else {
            if params.get("properties").is_none() && params.get("required").is_none() {
                return Verdict::Accept;
            }
            return Verdict::Reject(format!(
                "input for {} must be a JSON object",
                ctx.call.tool
            ));
        };

        if let Some(required) = params.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !fields.contains_key(name) || fields[name].is_null() {
                    return Verdict::Reject(format!("missing required field '{}'", name));
                }
            }
        }

        if let Some(props) = params.get("properties").and_then(Value::as_object) {
            for (name, value) in fields {
                let Some(expected) = props
                    .get(name)
                    .and_then(|p| p.get("type"))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                if !value.is_null() && !type_matches(expected, value) {
                    return Verdict::Reject(format!(
                        "field '{}' must be of type {}, got {}",
                        name,
                        expected,
                        json_type(value)
                    ));
                }
            }
        }

        Verdict::Accept
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        // unknown type keywords are not enforced
        _ => true,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
