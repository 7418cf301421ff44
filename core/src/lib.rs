//! `agentd-core`: the persistent multi-agent runtime.
//!
//! A session is a durable row, not a call stack. The [`store`] module is the
//! only path to that durability (§4.1); the [`tools`] module is the catalog
//! of things a session can call (§4.3); [`selector`] and [`rules`] narrow
//! which tools an LLM sees on a given step (§4.4, §4.5); [`session`] owns
//! the parts of the session lifecycle that happen outside a running step
//! (§4.6); [`driver`] is the Reason → Select → Act → Record loop that runs
//! inside one (§4.8); and [`instance_pool`] is what keeps a worker per
//! enabled instance claiming sessions off the Store's queue and running
//! them against that loop (§4.7).
//!
//! None of these modules know about HTTP, SSE, or the CLI — those live in
//! `agentd-gateway` and `agentd-cli`, both built against the types
//! re-exported here.

pub mod domain;
pub mod driver;
pub mod error;
pub mod instance_pool;
pub mod llm;
pub mod retry;
pub mod rules;
pub mod selector;
pub mod session;
pub mod store;
pub mod tools;

pub use domain::{
    AgentInstance, ChatTurn, ContextSnapshot, ExecutionPolicy, InstanceStatus, LlmPolicy,
    MessageRole, MessageType, Prompts, ReasoningStrategy, Rule, RuleActions, RuleConditions,
    RulePhase, SelectionStrategy, Session, SessionMessage, SessionState, Template,
    TemplateVersion, TemplateVersionSettings, ToolCallRequest, ToolCategory, ToolExecution,
    ToolExecutionStatus, ToolPolicy, ToolQuota, ToolRecord, ToolUsageCounter,
};

pub use error::{DriverError, GatewayError, LlmError, SelectorError, StoreError, ToolError};

pub use llm::{
    ChatOpenAI, ChatOptions, LlmClient, LlmMessage, LlmRole, LlmTurn, MockLlm, ToolChoice,
    ToolSchema,
};

pub use retry::{retry_with_backoff, LLM_BACKOFF, STORE_BACKOFF};

pub use rules::{apply_rules, RuleContext};

pub use selector::{build_query, cosine_similarity, select_tools, Embedder, HashEmbedder, OpenAiEmbedder};

pub use session::{render_available_tools, select_first_step_tools, SessionService};

pub use store::{ReleaseOutcome, SqliteStore, Store};

pub use tools::{
    quota_for, ClarificationTool, FinalAnswerTool, ReasoningTool, Tool, ToolCatalog,
    ToolInvocationOutcome, ToolResult, ToolResultStatus,
};

pub use driver::{Driver, RunOutcome};

pub use instance_pool::{InstancePool, SessionEventBus};
