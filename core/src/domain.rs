//! Data model (§3): plain serde structs flowing between [`crate::store`],
//! [`crate::driver`] and [`crate::tools`]. Follows the `state::ReActState`/
//! `ToolCall` convention of plain `Clone + Debug` structs passed by value
//! rather than handle/ORM types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// `template_versions.settings.tool_policy.selection_strategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    Static,
    #[default]
    Retrieval,
}

/// `template_versions.settings.base_class` (§9's tagged sum of agent variants):
/// which reasoning-phase strategy the driver runs for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningStrategy {
    /// No separate reasoning call; go straight to selection.
    Simple,
    /// Reasoning call is a free-text structured-output request.
    StructuredOutput,
    /// Reasoning call forces a `ReasoningTool` tool_call.
    ForcedReasoningTool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmPolicy {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key_ref: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub max_iterations: u32,
    pub time_budget_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolPolicy {
    pub required_tools: Vec<String>,
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    pub per_tool_quotas: HashMap<String, ToolQuota>,
    pub max_tools_in_prompt: usize,
    pub selection_strategy: SelectionStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolQuota {
    pub max_calls: Option<u32>,
    pub timeout_seconds: u64,
    pub cooldown_seconds: Option<u64>,
}

impl Default for ToolQuota {
    fn default() -> Self {
        Self {
            max_calls: None,
            timeout_seconds: 30,
            cooldown_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Prompts {
    pub system: String,
    pub initial_user: String,
    pub clarification: String,
}

/// `rule.apply_to`: which selection phase(s) a rule is evaluated at (§4.4, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePhase {
    PreRetrieval,
    PostRetrieval,
}

/// A rule from §4.5: `{apply_to, when: conditions, actions}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub apply_to: Vec<RulePhase>,
    pub when: RuleConditions,
    pub actions: RuleActions,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuleConditions {
    pub iteration_gte: Option<u32>,
    pub searches_used_gte: Option<u32>,
    pub clarifications_used_gte: Option<u32>,
    pub state: Option<SessionState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuleActions {
    pub exclude: Option<Vec<String>>,
    pub keep_only: Option<Vec<String>>,
    pub set_stage: Option<String>,
}

/// `template_versions.settings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVersionSettings {
    pub base_class: ReasoningStrategy,
    pub llm: LlmPolicy,
    pub execution: ExecutionPolicy,
    pub tool_policy: ToolPolicy,
    pub prompts: Prompts,
    pub rules: Vec<Rule>,
    /// Opaque MCP server configuration (§3); the core does not interpret this
    /// beyond passing it to whatever tool binding declares it needs MCP.
    #[serde(default)]
    pub mcp: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub description: String,
    pub active_version_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVersion {
    pub id: String,
    pub template_id: String,
    pub version: u32,
    pub settings: TemplateVersionSettings,
    pub tool_names: Vec<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Research,
    Memory,
    Utility,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: String,
    /// Case-insensitive logical key; CamelCase canonical form (e.g. `WebSearchTool`).
    pub name: String,
    pub description: String,
    /// `module.path:ClassName`-shaped binding string; resolved by the catalog
    /// to an in-process [`crate::tools::Tool`] impl (spec §4.3, §9).
    pub entrypoint: String,
    pub config: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
    pub category: ToolCategory,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Offline,
    Starting,
    Idle,
    Busy,
    Error,
    Stopping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub template_id: String,
    pub template_version_id: String,
    pub status: InstanceStatus,
    pub current_session_id: Option<String>,
    pub enabled: bool,
    pub auto_start: bool,
    pub priority: i32,
    pub heartbeat_at: Option<i64>,
    pub sessions_count: u64,
    pub messages_count: u64,
    pub tool_calls_count: u64,
    pub errors_count: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Inited,
    Researching,
    WaitingForClarification,
    Completed,
    Failed,
}

impl SessionState {
    /// §8 invariant 5: COMPLETED/FAILED are sticky — no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Per-tool call-count and last-call-time bookkeeping backing §4.3's quota checks.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolUsageCounter {
    pub calls: u32,
    pub last_call_at: Option<i64>,
}

/// `sessions.context_snapshot` — the entirety of in-memory state a worker
/// needs to resume a session; §9 requires nothing session-scoped live
/// anywhere else, so the driver reconstructs all working state from this
/// alone after a crash.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextSnapshot {
    pub iteration: u32,
    pub searches_used: u32,
    pub clarifications_used: u32,
    pub tool_usage: HashMap<String, ToolUsageCounter>,
    pub stage: Option<String>,
    pub last_reasoning: Option<String>,
    pub sources: Vec<String>,
    pub execution_result: Option<String>,
    pub started_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub template_version_id: String,
    pub instance_id: Option<String>,
    pub title: String,
    pub state: SessionState,
    pub context: ContextSnapshot,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Message,
    StepStart,
    ToolCall,
    ToolResult,
    StepEnd,
    Thinking,
    Error,
}

/// One LLM-emitted tool invocation request (assistant message `tool_calls[i]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub session_id: String,
    pub seq: u64,
    pub role: MessageRole,
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_call_id: Option<String>,
    pub message_type: MessageType,
    pub step: Option<u32>,
    pub step_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionStatus {
    Ok,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    pub session_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
    pub status: ToolExecutionStatus,
    pub started_at: i64,
    pub finished_at: i64,
}

/// A derived Q/A pair the search tool reads (external collaborator surface;
/// the core only defines the shape it queries, per spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: String,
    pub session_id: String,
    pub question: String,
    pub answer: String,
    pub created_at: i64,
}
