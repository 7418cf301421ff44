use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolResult};
use crate::domain::ContextSnapshot;
use crate::error::ToolError;

/// Suspends the session to WAITING_FOR_CLARIFICATION (§4.8 Selection phase).
/// Per spec §9's resolved open question, the driver rejects this tool_call
/// if it co-occurs with any other tool_call in the same assistant turn —
/// that check lives in the driver, not here, since it requires looking at
/// the full `tool_calls` list before any tool executes.
pub struct ClarificationTool;

#[async_trait]
impl Tool for ClarificationTool {
    fn name(&self) -> &str {
        "ClarificationTool"
    }

    fn description(&self) -> &str {
        "Ask the user one or more clarifying questions before continuing. Must be the only tool called this step."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "questions": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1,
                },
            },
            "required": ["questions"],
        })
    }

    async fn execute(&self, _ctx: &ContextSnapshot, args: Value) -> Result<ToolResult, ToolError> {
        let questions = args.get("questions").cloned().unwrap_or_else(|| json!([]));
        Ok(ToolResult::ok(json!({ "questions": questions })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_echoes_questions() {
        let tool = ClarificationTool;
        let result = tool
            .execute(
                &ContextSnapshot::default(),
                json!({"questions": ["which PDF?"]}),
            )
            .await
            .unwrap();
        assert_eq!(result.value["questions"][0], "which PDF?");
    }
}
