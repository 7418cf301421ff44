use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolResult};
use crate::domain::ContextSnapshot;
use crate::error::ToolError;

/// Synthetic internal tool (§4.8, §9): its "call" runs entirely locally,
/// producing a structured rationale echoed into the transcript rather than
/// invoking any external system. `select_tools` unions it into the
/// effective required-tools set on every resolution unless a template's
/// `tool_policy.denylist` names it explicitly (§4.4, §4.8).
pub struct ReasoningTool;

#[async_trait]
impl Tool for ReasoningTool {
    fn name(&self) -> &str {
        "ReasoningTool"
    }

    fn description(&self) -> &str {
        "Record the rationale for the next step before selecting a tool."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "rationale": {"type": "string"},
                "remaining_steps": {"type": "string"},
            },
            "required": ["rationale"],
        })
    }

    async fn execute(&self, _ctx: &ContextSnapshot, args: Value) -> Result<ToolResult, ToolError> {
        let rationale = args
            .get("rationale")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let remaining_steps = args
            .get("remaining_steps")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(ToolResult::ok(json!({
            "rationale": rationale,
            "remaining_steps": remaining_steps,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_echoes_rationale() {
        let tool = ReasoningTool;
        let result = tool
            .execute(
                &ContextSnapshot::default(),
                json!({"rationale": "need one more search"}),
            )
            .await
            .unwrap();
        assert_eq!(result.value["rationale"], "need one more search");
    }
}
