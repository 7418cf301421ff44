//! Typed persistence (spec §4.1, `C1`). `Store` is the only path to durable
//! state; every session mutation goes through it, and all state-column
//! transitions are compare-and-set.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::domain::{
    AgentInstance, ContextSnapshot, Session, SessionMessage, SessionState, Template,
    TemplateVersion, ToolExecution, ToolRecord,
};
use crate::error::StoreError;

/// Outcome a worker reports when releasing an instance (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Idle,
    Error,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_session(
        &self,
        template_version_id: &str,
        title: &str,
        initial_user_message: &str,
    ) -> Result<Session, StoreError>;

    async fn load_session(
        &self,
        id: &str,
    ) -> Result<(Session, Vec<SessionMessage>), StoreError>;

    /// Appends one message, assigning it the next gap-free sequence number
    /// for this session (§8 invariant 3), and returns that sequence.
    async fn append_message(
        &self,
        session_id: &str,
        message: &SessionMessage,
    ) -> Result<u64, StoreError>;

    /// Appends a message, records a tool execution row, and updates the
    /// context snapshot in one transaction — the driver's per-step write
    /// (spec §4.1: "every session mutation... runs in a single transaction").
    async fn record_tool_execution(
        &self,
        session_id: &str,
        message: &SessionMessage,
        execution: &ToolExecution,
        new_context: &ContextSnapshot,
    ) -> Result<u64, StoreError>;

    /// Compare-and-set on `session.state`. Fails with [`StoreError::StaleSession`]
    /// if the current state no longer matches `expected_old_state`.
    async fn update_session_state(
        &self,
        id: &str,
        expected_old_state: SessionState,
        new_state: SessionState,
        new_context: &ContextSnapshot,
    ) -> Result<(), StoreError>;

    /// CAS: sets `current_session_id`+`status=BUSY` iff the instance's
    /// status is currently IDLE or STARTING. Returns `Ok(false)` (not an
    /// error) if another worker won the race.
    async fn claim_instance(&self, instance_id: &str, session_id: &str) -> Result<bool, StoreError>;

    async fn release_instance(
        &self,
        instance_id: &str,
        outcome: ReleaseOutcome,
        last_error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn find_idle_instance(
        &self,
        template_id: &str,
    ) -> Result<Option<AgentInstance>, StoreError>;

    /// §4.7 main-loop poll: sessions ready to be claimed by a worker pinned
    /// to `template_version_id`.
    async fn find_claimable_sessions(
        &self,
        template_version_id: &str,
    ) -> Result<Vec<Session>, StoreError>;

    async fn get_instance(&self, id: &str) -> Result<AgentInstance, StoreError>;
    async fn list_enabled_instances(&self) -> Result<Vec<AgentInstance>, StoreError>;
    async fn heartbeat_instance(&self, id: &str) -> Result<(), StoreError>;

    async fn get_template(&self, id: &str) -> Result<Template, StoreError>;
    async fn get_template_by_name(&self, name: &str) -> Result<Option<Template>, StoreError>;
    async fn get_template_version(&self, id: &str) -> Result<TemplateVersion, StoreError>;
    async fn list_active_template_versions(&self) -> Result<Vec<TemplateVersion>, StoreError>;

    async fn get_tool(&self, name: &str) -> Result<Option<ToolRecord>, StoreError>;
    async fn list_tools(&self, names: &[String]) -> Result<Vec<ToolRecord>, StoreError>;

    /// Session browsing surface for the Gateway's `/v1/chats*` endpoints
    /// (spec §6 "listed for boundary completeness" — not part of the
    /// core's own responsibilities, but backed by the same Store).
    async fn list_sessions(&self, limit: u32) -> Result<Vec<Session>, StoreError>;
    async fn rename_session(&self, id: &str, title: &str) -> Result<(), StoreError>;
    async fn delete_session(&self, id: &str) -> Result<(), StoreError>;

    /// Declarative bootstrap writes, used by the CLI's config-file loader
    /// at process start. Distinct from the admin HTTP CRUD surface (§6),
    /// which this runtime does not implement — there is no live network
    /// path to these methods, only the one-time load of an operator-owned
    /// template file into an otherwise-empty store.
    async fn upsert_template(&self, template: &Template) -> Result<(), StoreError>;
    async fn upsert_template_version(&self, version: &TemplateVersion) -> Result<(), StoreError>;
    async fn upsert_tool(&self, tool: &ToolRecord) -> Result<(), StoreError>;
    async fn upsert_instance(&self, instance: &AgentInstance) -> Result<(), StoreError>;
}
