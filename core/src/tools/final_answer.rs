use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolResult};
use crate::domain::ContextSnapshot;
use crate::error::ToolError;

/// Terminates the agent loop (§4.8 Action phase: "if tc is FinalAnswerTool:
/// set context.state..."). Always a member of `required_tools` in practice;
/// the selector's empty-result fallback (§4.4 step 7) falls back to this
/// tool by name if present in the catalog.
pub struct FinalAnswerTool;

#[async_trait]
impl Tool for FinalAnswerTool {
    fn name(&self) -> &str {
        "FinalAnswerTool"
    }

    fn description(&self) -> &str {
        "Finish the task and report the final answer to the user."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {"type": "string", "enum": ["completed", "failed"]},
                "answer": {"type": "string"},
            },
            "required": ["status", "answer"],
        })
    }

    async fn execute(&self, _ctx: &ContextSnapshot, args: Value) -> Result<ToolResult, ToolError> {
        let status = args
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("completed")
            .to_string();
        let answer = args
            .get("answer")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(ToolResult::ok(json!({ "status": status, "answer": answer })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_echoes_status_and_answer() {
        let tool = FinalAnswerTool;
        let result = tool
            .execute(&ContextSnapshot::default(), json!({"status": "completed", "answer": "4"}))
            .await
            .unwrap();
        assert_eq!(result.value["answer"], "4");
        assert_eq!(result.value["status"], "completed");
    }

    #[tokio::test]
    async fn execute_defaults_status_to_completed() {
        let tool = FinalAnswerTool;
        let result = tool
            .execute(&ContextSnapshot::default(), json!({"answer": "ok"}))
            .await
            .unwrap();
        assert_eq!(result.value["status"], "completed");
    }
}
