//! LLM client abstraction for the agent loop driver (§4.8).
//!
//! The driver issues two kinds of calls per step — a reasoning call and a
//! selection call — both against the same `chat` entry point, distinguished
//! only by [`ChatOptions::tool_choice`]. Streaming text deltas are pushed
//! through `delta_tx` as they arrive so the driver can re-emit them as
//! `message` events without buffering the whole response (§4.8 "Streaming
//! pass-through").

mod mock;
mod openai;

pub use mock::MockLlm;
pub use openai::ChatOpenAI;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::ToolCallRequest;
use crate::error::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in the chat history sent to the provider. Built from
/// [`crate::domain::SessionMessage`] by the driver; kept separate from that
/// type so the wire shape can diverge (e.g. dropping internal `step_data`)
/// without touching the persisted schema.
#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_call_id: Option<String>,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: LlmRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// JSON-Schema function-tool descriptor handed to the provider, built by the
/// Tool Catalog (§4.3) from a resolved tool's declared input schema.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// `tool_choice` modes named in §6: `{"auto","required",{"type":"function",...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    Forced(String),
}

#[derive(Debug, Clone, Default)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Default)]
pub struct LlmTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<LlmUsage>,
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub tools: Vec<ToolSchema>,
    pub tool_choice: ToolChoice,
    pub parallel_tool_calls: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-call deadline; the driver computes this from the session's
    /// remaining time budget (§5 "LLM call timeout").
    pub timeout: std::time::Duration,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            parallel_tool_calls: true,
            temperature: 0.7,
            max_tokens: 4096,
            timeout: std::time::Duration::from_secs(60),
        }
    }
}

/// An OpenAI-compatible chat-completions endpoint (§1, §6: the core treats
/// the provider as a black-box streaming HTTP service).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[LlmMessage],
        options: &ChatOptions,
        delta_tx: Option<mpsc::Sender<String>>,
    ) -> Result<LlmTurn, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_choice_defaults_to_auto() {
        assert_eq!(ToolChoice::default(), ToolChoice::Auto);
    }

    #[test]
    fn llm_message_constructors_set_role() {
        assert_eq!(LlmMessage::system("x").role, LlmRole::System);
        assert_eq!(LlmMessage::user("x").role, LlmRole::User);
        assert_eq!(
            LlmMessage::tool("call-1", "result").tool_call_id.as_deref(),
            Some("call-1")
        );
    }
}
