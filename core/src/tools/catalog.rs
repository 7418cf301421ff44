//! Tool Catalog (§4.3, `C3`): resolves a tool name to an executable binding
//! and enforces the per-tool quota/cooldown/timeout policy before the
//! invocation ever reaches the tool.
//!
//! Built as a resolution-cache pattern (a name-keyed registry behind a
//! concurrent map), generalized from an MCP-specific binding string to a
//! name-keyed registry of `Arc<dyn Tool>` — the Rust-idiomatic replacement
//! for a `module.path:ClassName` entrypoint string (§3, §9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;

use crate::domain::{ContextSnapshot, ToolExecutionStatus, ToolQuota, ToolRecord, ToolUsageCounter};
use crate::llm::ToolSchema;

use super::{Tool, ToolResultStatus};

fn canonical_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Outcome of one [`ToolCatalog::invoke`] call. `invoked` tells the caller
/// (the driver) whether to bump the session's per-tool usage counter and
/// `last_call_at` — a quota/cooldown rejection never calls the tool, so it
/// must not count against the tool's own quota window again.
#[derive(Debug, Clone)]
pub struct ToolInvocationOutcome {
    pub status: ToolExecutionStatus,
    pub value: Value,
    pub invoked: bool,
}

impl ToolInvocationOutcome {
    fn rejected(reason: &'static str) -> Self {
        Self {
            status: ToolExecutionStatus::Error,
            value: serde_json::json!({ "error": reason }),
            invoked: false,
        }
    }
}

/// Process-wide registry of resolved tool bindings. Read-mostly; the
/// invalidation-on-admin-update behavior (§4.3, bounded at 60s staleness) is
/// modeled by [`ToolCatalog::invalidate`] bumping a generation counter that
/// callers can check against their own cached [`ToolRecord`] snapshots —
/// the catalog itself always resolves against whatever is currently
/// registered, so invalidation only matters to callers caching `ToolRecord`
/// lists fetched from the Store.
pub struct ToolCatalog {
    tools: DashMap<String, Arc<dyn Tool>>,
    generation: std::sync::atomic::AtomicU64,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCatalog {
    /// Registers the three synthetic tools the driver depends on directly
    /// (§4.8, §9, SPEC_FULL.md §C.2). Callers add research/memory/utility
    /// bindings with [`ToolCatalog::register`].
    pub fn new() -> Self {
        let catalog = Self {
            tools: DashMap::new(),
            generation: std::sync::atomic::AtomicU64::new(0),
        };
        catalog.register(Arc::new(super::FinalAnswerTool));
        catalog.register(Arc::new(super::ClarificationTool));
        catalog.register(Arc::new(super::ReasoningTool));
        catalog
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.insert(canonical_key(tool.name()), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(&canonical_key(name)).map(|e| e.clone())
    }

    pub fn invalidate(&self) {
        self.generation
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Builds the JSON-Schema function-tool descriptors the LLM sees for a
    /// resolved tool subset, in the order given (§4.4's ordering is the
    /// selector's job; this just renders what it picked).
    pub fn describe(&self, records: &[ToolRecord]) -> Vec<ToolSchema> {
        records
            .iter()
            .filter_map(|record| {
                let tool = self.get(&record.name)?;
                Some(ToolSchema {
                    name: record.name.clone(),
                    description: record.description.clone(),
                    parameters: tool.input_schema(),
                })
            })
            .collect()
    }

    /// Enforces quota + cooldown (synchronous pre-checks), then invokes
    /// under a `timeout_seconds` deadline (§4.3). `counter` is the session's
    /// *current* usage for this tool, read before the call — the driver
    /// commits the post-call counter update as part of its single
    /// Store transaction (§4.1), not here.
    pub async fn invoke(
        &self,
        record: &ToolRecord,
        quota: &ToolQuota,
        counter: &ToolUsageCounter,
        ctx: &ContextSnapshot,
        args: Value,
        now_ms: i64,
    ) -> ToolInvocationOutcome {
        if let Some(max_calls) = quota.max_calls {
            if counter.calls >= max_calls {
                return ToolInvocationOutcome::rejected("quota_exceeded");
            }
        }
        if let (Some(cooldown_seconds), Some(last_call_at)) =
            (quota.cooldown_seconds, counter.last_call_at)
        {
            let elapsed_ms = now_ms.saturating_sub(last_call_at);
            if elapsed_ms < (cooldown_seconds as i64) * 1000 {
                return ToolInvocationOutcome::rejected("cooldown");
            }
        }

        let Some(tool) = self.get(&record.name) else {
            return ToolInvocationOutcome {
                status: ToolExecutionStatus::Error,
                value: serde_json::json!({ "error": format!("unknown tool: {}", record.name) }),
                invoked: false,
            };
        };

        let deadline = Duration::from_secs(quota.timeout_seconds);
        match tokio::time::timeout(deadline, tool.execute(ctx, args)).await {
            Err(_elapsed) => ToolInvocationOutcome {
                status: ToolExecutionStatus::Timeout,
                value: serde_json::json!({ "error": "timeout" }),
                invoked: true,
            },
            Ok(Err(e)) => ToolInvocationOutcome {
                status: ToolExecutionStatus::Error,
                value: serde_json::json!({ "error": e.to_string() }),
                invoked: true,
            },
            Ok(Ok(result)) => ToolInvocationOutcome {
                status: match result.status {
                    ToolResultStatus::Ok => ToolExecutionStatus::Ok,
                    ToolResultStatus::Error => ToolExecutionStatus::Error,
                },
                value: result.value,
                invoked: true,
            },
        }
    }
}

/// Looks up each name's [`ToolQuota`], falling back to the default quota for
/// tools with no per-tool entry in the template version's tool policy.
pub fn quota_for<'a>(
    quotas: &'a HashMap<String, ToolQuota>,
    name: &str,
) -> std::borrow::Cow<'a, ToolQuota> {
    quotas
        .get(name)
        .map(std::borrow::Cow::Borrowed)
        .unwrap_or_else(|| std::borrow::Cow::Owned(ToolQuota::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ToolCategory;

    fn record(name: &str) -> ToolRecord {
        ToolRecord {
            id: "t1".into(),
            name: name.into(),
            description: "desc".into(),
            entrypoint: "builtin".into(),
            config: serde_json::json!({}),
            embedding: None,
            category: ToolCategory::Utility,
            active: true,
        }
    }

    #[tokio::test]
    async fn invoke_rejects_when_quota_exhausted() {
        let catalog = ToolCatalog::new();
        let quota = ToolQuota {
            max_calls: Some(1),
            timeout_seconds: 5,
            cooldown_seconds: None,
        };
        let counter = ToolUsageCounter {
            calls: 1,
            last_call_at: None,
        };
        let outcome = catalog
            .invoke(
                &record("FinalAnswerTool"),
                &quota,
                &counter,
                &ContextSnapshot::default(),
                serde_json::json!({"answer": "x"}),
                0,
            )
            .await;
        assert!(!outcome.invoked);
        assert_eq!(outcome.status, ToolExecutionStatus::Error);
        assert_eq!(outcome.value["error"], "quota_exceeded");
    }

    #[tokio::test]
    async fn invoke_rejects_within_cooldown_window() {
        let catalog = ToolCatalog::new();
        let quota = ToolQuota {
            max_calls: None,
            timeout_seconds: 5,
            cooldown_seconds: Some(10),
        };
        let counter = ToolUsageCounter {
            calls: 1,
            last_call_at: Some(1_000),
        };
        let outcome = catalog
            .invoke(
                &record("FinalAnswerTool"),
                &quota,
                &counter,
                &ContextSnapshot::default(),
                serde_json::json!({"answer": "x"}),
                1_500, // only 0.5s elapsed, cooldown is 10s
            )
            .await;
        assert!(!outcome.invoked);
        assert_eq!(outcome.value["error"], "cooldown");
    }

    #[tokio::test]
    async fn invoke_succeeds_and_marks_invoked() {
        let catalog = ToolCatalog::new();
        let quota = ToolQuota::default();
        let counter = ToolUsageCounter::default();
        let outcome = catalog
            .invoke(
                &record("FinalAnswerTool"),
                &quota,
                &counter,
                &ContextSnapshot::default(),
                serde_json::json!({"status": "completed", "answer": "4"}),
                0,
            )
            .await;
        assert!(outcome.invoked);
        assert_eq!(outcome.status, ToolExecutionStatus::Ok);
        assert_eq!(outcome.value["answer"], "4");
    }

    #[test]
    fn describe_skips_unregistered_tools() {
        let catalog = ToolCatalog::new();
        let records = vec![record("FinalAnswerTool"), record("NoSuchTool")];
        let schemas = catalog.describe(&records);
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "FinalAnswerTool");
    }
}
