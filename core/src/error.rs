//! Top-level error types for the agent runtime, grouped by the error classes
//! the driver dispatches on (transient vs. invariant vs. policy).

use thiserror::Error;

/// Store-layer failures (`C1`). `Transient` is retried by the driver with
/// exponential backoff; the others are not.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("stale session: compare-and-set on state failed")]
    StaleSession,
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// LLM client failures.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("malformed response: {0}")]
    Invariant(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
}

/// Tool execution failures (`C3`).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("quota_exceeded")]
    QuotaExceeded,
    #[error("cooldown")]
    Cooldown,
    #[error("timeout")]
    Timeout,
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool raised: {0}")]
    Raised(String),
}

/// Tool Selector failures (`C4`).
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("no tools available after selection and no FinalAnswerTool in catalog")]
    NoToolsAvailable,
    #[error("embedding failed: {0}")]
    Embedding(String),
}

/// Failures surfaced by the Agent Loop Driver (`C8`), mapped from spec §7's
/// error classes onto the outcomes a worker must act on.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Selector(#[from] SelectorError),
    #[error("iteration_limit")]
    IterationLimit,
    #[error("time_budget_exceeded")]
    TimeBudgetExceeded,
    #[error("clarification co-occurred with other tool calls")]
    ClarificationMixed,
    #[error("worker fault: {0}")]
    WorkerFault(String),
}

/// Gateway-layer failures (`C9`): surfaced as HTTP status codes by
/// `agentd-gateway`, never by the kernel itself.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("model_not_found")]
    ModelNotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl DriverError {
    /// Whether this error should land the session in FAILED vs. simply
    /// releasing the instance so another worker can retry (`StaleSession`,
    /// transient store errors that exhausted retries still fail the session
    /// per spec §7 — only `StoreError::StaleSession` itself returns the
    /// session to RESEARCHING untouched).
    pub fn is_stale_session(&self) -> bool {
        matches!(self, DriverError::Store(StoreError::StaleSession))
    }
}
