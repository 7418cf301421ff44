//! Wire-level step events produced by the agent loop driver (runtime spec §4.2).
//!
//! A [`StepEvent`] is the payload half of one SSE frame; the `event:` line
//! carries the kind (see [`StepEvent::kind`]), so the JSON body itself
//! carries no `type` discriminant — it is exactly the fields in the event
//! kinds table, nothing more (runtime spec §6 bit-level format).

use serde::Serialize;
use serde_json::{json, Value};

/// One event emitted by the driver while it executes a session.
///
/// Variant set matches the event kinds table: `step_start`, `tool_call`,
/// `tool_result`, `step_end`, `thinking`, `error`, `message`, `done`.
#[derive(Clone, Debug, PartialEq)]
pub enum StepEvent {
    StepStart {
        step: u32,
        max_steps: u32,
        description: String,
        status: StepStartStatus,
    },
    ToolCall {
        step: u32,
        tool_name: String,
        args: Value,
    },
    ToolResult {
        step: u32,
        tool_name: String,
        result: Value,
        success: bool,
        duration_ms: u64,
    },
    StepEnd {
        step: u32,
        status: StepEndStatus,
        duration_ms: u64,
    },
    Thinking {
        step: u32,
        text: String,
    },
    Error {
        step: Option<u32>,
        message: String,
    },
    /// OpenAI-delta-style chunk: `{choices:[{delta:{content:"…"}}]}`.
    Message {
        content: String,
    },
    Done {
        finish_reason: String,
    },
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStartStatus {
    Running,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepEndStatus {
    Completed,
    Error,
}

impl StepEvent {
    /// The SSE `event:` line value for this variant (runtime spec §6).
    pub fn kind(&self) -> &'static str {
        match self {
            StepEvent::StepStart { .. } => "step_start",
            StepEvent::ToolCall { .. } => "tool_call",
            StepEvent::ToolResult { .. } => "tool_result",
            StepEvent::StepEnd { .. } => "step_end",
            StepEvent::Thinking { .. } => "thinking",
            StepEvent::Error { .. } => "error",
            StepEvent::Message { .. } => "message",
            StepEvent::Done { .. } => "done",
        }
    }

    /// The JSON body for this event, un-tagged (the `type` lives in the
    /// `event:` line, not the `data:` body). The `message` kind is wrapped
    /// into an OpenAI chat-completion-chunk shape by the SSE encoder, which
    /// needs the session/model context this type does not carry; callers
    /// that need that shape should go through [`crate::sse`] instead of this
    /// method directly.
    pub fn data_value(&self) -> Value {
        match self {
            StepEvent::StepStart {
                step,
                max_steps,
                description,
                status,
            } => json!({
                "step": step,
                "max_steps": max_steps,
                "description": description,
                "status": status,
            }),
            StepEvent::ToolCall {
                step,
                tool_name,
                args,
            } => json!({
                "step": step,
                "tool_name": tool_name,
                "args": args,
            }),
            StepEvent::ToolResult {
                step,
                tool_name,
                result,
                success,
                duration_ms,
            } => json!({
                "step": step,
                "tool_name": tool_name,
                "result": result,
                "success": success,
                "duration_ms": duration_ms,
            }),
            StepEvent::StepEnd {
                step,
                status,
                duration_ms,
            } => json!({
                "step": step,
                "status": status,
                "duration_ms": duration_ms,
            }),
            StepEvent::Thinking { step, text } => json!({
                "step": step,
                "text": text,
            }),
            StepEvent::Error { step, message } => json!({
                "step": step,
                "message": message,
            }),
            StepEvent::Message { content } => json!({
                "choices": [{"delta": {"content": content}}],
            }),
            StepEvent::Done { finish_reason } => json!({
                "finish_reason": finish_reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_spec_event_names() {
        assert_eq!(
            StepEvent::StepStart {
                step: 1,
                max_steps: 10,
                description: "x".into(),
                status: StepStartStatus::Running
            }
            .kind(),
            "step_start"
        );
        assert_eq!(
            StepEvent::Done {
                finish_reason: "stop".into()
            }
            .kind(),
            "done"
        );
    }

    #[test]
    fn data_value_has_no_type_tag() {
        let ev = StepEvent::ToolResult {
            step: 2,
            tool_name: "WebSearchTool".into(),
            result: json!({"answer": "4"}),
            success: true,
            duration_ms: 120,
        };
        let v = ev.data_value();
        assert!(v.get("type").is_none());
        assert_eq!(v["tool_name"], "WebSearchTool");
    }
}
