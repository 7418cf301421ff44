//! Tool subsystem (§4.3, `C3`): the [`Tool`] trait every binding implements,
//! plus the three synthetic tools the driver depends on directly
//! (`FinalAnswerTool`, `ClarificationTool`, `ReasoningTool` — §4.8, §9,
//! SPEC_FULL.md §C.2). Concrete research/memory/utility tool implementations
//! are out of scope (spec §1); callers register their own via
//! [`catalog::ToolCatalog::register`].

mod catalog;
mod clarification;
mod final_answer;
mod reasoning;

pub use catalog::{quota_for, ToolCatalog, ToolInvocationOutcome};
pub use clarification::ClarificationTool;
pub use final_answer::FinalAnswerTool;
pub use reasoning::ReasoningTool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ContextSnapshot;
use crate::error::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolResultStatus,
    pub value: Value,
}

impl ToolResult {
    pub fn ok(value: Value) -> Self {
        Self {
            status: ToolResultStatus::Ok,
            value,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolResultStatus::Error,
            value: serde_json::json!({ "error": message.into() }),
        }
    }
}

/// A single invocable tool (§4.3). `execute` receives the session's decoded
/// [`ContextSnapshot`] (read-only — the catalog, not the tool, owns counter
/// bookkeeping) and the LLM-supplied arguments, already schema-shaped per
/// [`Tool::input_schema`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Case-insensitive logical key; canonical form is CamelCase (§3).
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    async fn execute(&self, ctx: &ContextSnapshot, args: Value) -> Result<ToolResult, ToolError>;
}
