//! SQLite-backed [`Store`]. One connection per operation via
//! `spawn_blocking`, `INSERT OR REPLACE` upserts — follows
//! `memory::sqlite_saver::SqliteSaver`'s connection idiom, generalized from
//! a single checkpoints table to the full relational schema of §3. The CAS
//! state transitions have no prior analogue and are built fresh on top of
//! `UPDATE ... WHERE state = ?` affected-row counts.

use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use uuid::Uuid;

use crate::domain::{
    AgentInstance, ContextSnapshot, InstanceStatus, MessageRole, MessageType, Session,
    SessionMessage, SessionState, Template, TemplateVersion, ToolCallRequest, ToolExecution,
    ToolExecutionStatus, ToolRecord,
};
use crate::error::StoreError;

use super::{ReleaseOutcome, Store};

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn session_state_str(s: SessionState) -> &'static str {
    match s {
        SessionState::Inited => "inited",
        SessionState::Researching => "researching",
        SessionState::WaitingForClarification => "waiting_for_clarification",
        SessionState::Completed => "completed",
        SessionState::Failed => "failed",
    }
}

fn session_state_from_str(s: &str) -> SessionState {
    match s {
        "inited" => SessionState::Inited,
        "researching" => SessionState::Researching,
        "waiting_for_clarification" => SessionState::WaitingForClarification,
        "completed" => SessionState::Completed,
        "failed" => SessionState::Failed,
        _ => SessionState::Failed,
    }
}

fn instance_status_str(s: InstanceStatus) -> &'static str {
    match s {
        InstanceStatus::Offline => "offline",
        InstanceStatus::Starting => "starting",
        InstanceStatus::Idle => "idle",
        InstanceStatus::Busy => "busy",
        InstanceStatus::Error => "error",
        InstanceStatus::Stopping => "stopping",
    }
}

fn instance_status_from_str(s: &str) -> InstanceStatus {
    match s {
        "offline" => InstanceStatus::Offline,
        "starting" => InstanceStatus::Starting,
        "idle" => InstanceStatus::Idle,
        "busy" => InstanceStatus::Busy,
        "error" => InstanceStatus::Error,
        "stopping" => InstanceStatus::Stopping,
        _ => InstanceStatus::Offline,
    }
}

/// Flags every connection is opened with. `SQLITE_OPEN_URI` is always set so
/// that an in-memory store (see [`SqliteStore::new`]) can address its
/// shared-cache database by URI; it has no effect on a plain file path.
fn open_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI
}

/// SQLite-backed persistence layer. For single-node deployments; scale-out
/// is a non-goal (spec §1).
///
/// Every operation opens its own connection via `spawn_blocking` rather than
/// holding one open across `.await` points. A bare `:memory:` path would
/// defeat that: SQLite hands out a brand-new, empty database to *each*
/// connection that names it, so the second operation would never see what
/// the first wrote. `new` rewrites `:memory:` to a uniquely-named
/// `file:...?mode=memory&cache=shared` URI instead, so every connection
/// opened against `db_path` for the life of this store addresses the same
/// backing database; `_anchor` holds one connection open for that database's
/// whole lifetime, since a shared-cache in-memory database is destroyed the
/// moment its last connection closes.
pub struct SqliteStore {
    db_path: PathBuf,
    _anchor: Option<Connection>,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let requested = path.into();
        let (db_path, anchor) = if requested.as_os_str() == ":memory:" {
            let uri = format!("file:agentd-{}?mode=memory&cache=shared", Uuid::new_v4());
            let anchor = Connection::open_with_flags(&uri, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            (PathBuf::from(uri), Some(anchor))
        } else {
            (requested, None)
        };
        let conn = Connection::open_with_flags(&db_path, open_flags())
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            db_path,
            _anchor: anchor,
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                active_version_id TEXT
            );
            CREATE TABLE IF NOT EXISTS template_versions (
                id TEXT PRIMARY KEY,
                template_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                settings TEXT NOT NULL,
                tool_names TEXT NOT NULL,
                active INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tools (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                entrypoint TEXT NOT NULL,
                config TEXT NOT NULL,
                embedding TEXT,
                category TEXT NOT NULL,
                active INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS agent_instances (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                template_id TEXT NOT NULL,
                template_version_id TEXT NOT NULL,
                status TEXT NOT NULL,
                current_session_id TEXT,
                enabled INTEGER NOT NULL,
                auto_start INTEGER NOT NULL,
                priority INTEGER NOT NULL,
                heartbeat_at INTEGER,
                sessions_count INTEGER NOT NULL DEFAULT 0,
                messages_count INTEGER NOT NULL DEFAULT 0,
                tool_calls_count INTEGER NOT NULL DEFAULT 0,
                errors_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                last_error_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                template_version_id TEXT NOT NULL,
                instance_id TEXT,
                title TEXT NOT NULL,
                state TEXT NOT NULL,
                context TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS session_messages (
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_calls TEXT NOT NULL,
                tool_call_id TEXT,
                message_type TEXT NOT NULL,
                step INTEGER,
                step_data TEXT,
                PRIMARY KEY (session_id, seq)
            );
            CREATE TABLE IF NOT EXISTS tool_executions (
                session_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                arguments TEXT NOT NULL,
                result TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    fn next_seq(conn: &Connection, session_id: &str) -> Result<u64, StoreError> {
        let max: Option<i64> = conn
            .query_row(
                "SELECT MAX(seq) FROM session_messages WHERE session_id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(max.map(|m| m as u64 + 1).unwrap_or(0))
    }

    fn insert_message(
        conn: &Connection,
        session_id: &str,
        seq: u64,
        message: &SessionMessage,
    ) -> Result<(), StoreError> {
        let tool_calls = serde_json::to_string(&message.tool_calls)?;
        let step_data = message
            .step_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO session_messages
                (session_id, seq, role, content, tool_calls, tool_call_id, message_type, step, step_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session_id,
                seq as i64,
                role_str(message.role),
                message.content,
                tool_calls,
                message.tool_call_id,
                message_type_str(message.message_type),
                message.step,
                step_data,
            ],
        )
        .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }

    fn touch_session(
        conn: &Connection,
        session_id: &str,
        context: &ContextSnapshot,
    ) -> Result<(), StoreError> {
        let ctx_json = serde_json::to_string(context)?;
        conn.execute(
            "UPDATE sessions SET context = ?1, updated_at = ?2 WHERE id = ?3",
            params![ctx_json, now_ms(), session_id],
        )
        .map_err(|e| StoreError::Transient(e.to_string()))?;
        Ok(())
    }
}

fn role_str(r: MessageRole) -> &'static str {
    match r {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}

fn role_from_str(s: &str) -> MessageRole {
    match s {
        "system" => MessageRole::System,
        "user" => MessageRole::User,
        "assistant" => MessageRole::Assistant,
        _ => MessageRole::Tool,
    }
}

fn message_type_str(t: MessageType) -> &'static str {
    match t {
        MessageType::Message => "message",
        MessageType::StepStart => "step_start",
        MessageType::ToolCall => "tool_call",
        MessageType::ToolResult => "tool_result",
        MessageType::StepEnd => "step_end",
        MessageType::Thinking => "thinking",
        MessageType::Error => "error",
    }
}

fn message_type_from_str(s: &str) -> MessageType {
    match s {
        "step_start" => MessageType::StepStart,
        "tool_call" => MessageType::ToolCall,
        "tool_result" => MessageType::ToolResult,
        "step_end" => MessageType::StepEnd,
        "thinking" => MessageType::Thinking,
        "error" => MessageType::Error,
        _ => MessageType::Message,
    }
}

fn row_to_message(
    role: String,
    content: String,
    tool_calls: String,
    tool_call_id: Option<String>,
    message_type: String,
    step: Option<u32>,
    step_data: Option<String>,
    session_id: &str,
    seq: u64,
) -> Result<SessionMessage, StoreError> {
    let tool_calls: Vec<ToolCallRequest> = serde_json::from_str(&tool_calls)?;
    let step_data = step_data.map(|s| serde_json::from_str(&s)).transpose()?;
    Ok(SessionMessage {
        session_id: session_id.to_string(),
        seq,
        role: role_from_str(&role),
        content,
        tool_calls,
        tool_call_id,
        message_type: message_type_from_str(&message_type),
        step,
        step_data,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_session(
        &self,
        template_version_id: &str,
        title: &str,
        initial_user_message: &str,
    ) -> Result<Session, StoreError> {
        let db_path = self.db_path.clone();
        let template_version_id = template_version_id.to_string();
        let title = title.to_string();
        let initial_user_message = initial_user_message.to_string();
        tokio::task::spawn_blocking(move || -> Result<Session, StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let id = Uuid::new_v4().to_string();
            let now = now_ms();
            let context = ContextSnapshot {
                started_at: Some(now),
                ..Default::default()
            };
            let ctx_json = serde_json::to_string(&context)?;
            conn.execute(
                "INSERT INTO sessions (id, template_version_id, instance_id, title, state, context, created_at, updated_at)
                 VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id,
                    template_version_id,
                    title,
                    session_state_str(SessionState::Inited),
                    ctx_json,
                    now,
                ],
            )
            .map_err(|e| StoreError::Transient(e.to_string()))?;

            let seq = SqliteStore::next_seq(&conn, &id)?;
            let msg = SessionMessage {
                session_id: id.clone(),
                seq,
                role: MessageRole::User,
                content: initial_user_message,
                tool_calls: vec![],
                tool_call_id: None,
                message_type: MessageType::Message,
                step: None,
                step_data: None,
            };
            SqliteStore::insert_message(&conn, &id, seq, &msg)?;

            Ok(Session {
                id,
                template_version_id,
                instance_id: None,
                title,
                state: SessionState::Inited,
                context,
                created_at: now,
                updated_at: now,
            })
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn load_session(&self, id: &str) -> Result<(Session, Vec<SessionMessage>), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(Session, Vec<SessionMessage>), StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let (template_version_id, instance_id, title, state, context, created_at, updated_at): (
                String,
                Option<String>,
                String,
                String,
                String,
                i64,
                i64,
            ) = conn
                .query_row(
                    "SELECT template_version_id, instance_id, title, state, context, created_at, updated_at
                     FROM sessions WHERE id = ?1",
                    params![id],
                    |r| {
                        Ok((
                            r.get(0)?,
                            r.get(1)?,
                            r.get(2)?,
                            r.get(3)?,
                            r.get(4)?,
                            r.get(5)?,
                            r.get(6)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| StoreError::Transient(e.to_string()))?
                .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;

            let session = Session {
                id: id.clone(),
                template_version_id,
                instance_id,
                title,
                state: session_state_from_str(&state),
                context: serde_json::from_str(&context)?,
                created_at,
                updated_at,
            };

            let mut stmt = conn
                .prepare(
                    "SELECT seq, role, content, tool_calls, tool_call_id, message_type, step, step_data
                     FROM session_messages WHERE session_id = ?1 ORDER BY seq ASC",
                )
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let rows = stmt
                .query_map(params![id], |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, Option<String>>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, Option<u32>>(6)?,
                        r.get::<_, Option<String>>(7)?,
                    ))
                })
                .map_err(|e| StoreError::Transient(e.to_string()))?;

            let mut messages = Vec::new();
            for row in rows {
                let (seq, role, content, tool_calls, tool_call_id, message_type, step, step_data) =
                    row.map_err(|e| StoreError::Transient(e.to_string()))?;
                messages.push(row_to_message(
                    role,
                    content,
                    tool_calls,
                    tool_call_id,
                    message_type,
                    step,
                    step_data,
                    &id,
                    seq as u64,
                )?);
            }

            Ok((session, messages))
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn append_message(
        &self,
        session_id: &str,
        message: &SessionMessage,
    ) -> Result<u64, StoreError> {
        let db_path = self.db_path.clone();
        let session_id = session_id.to_string();
        let message = message.clone();
        tokio::task::spawn_blocking(move || -> Result<u64, StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let seq = SqliteStore::next_seq(&conn, &session_id)?;
            SqliteStore::insert_message(&conn, &session_id, seq, &message)?;
            conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                params![now_ms(), session_id],
            )
            .map_err(|e| StoreError::Transient(e.to_string()))?;
            Ok(seq)
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn record_tool_execution(
        &self,
        session_id: &str,
        message: &SessionMessage,
        execution: &ToolExecution,
        new_context: &ContextSnapshot,
    ) -> Result<u64, StoreError> {
        let db_path = self.db_path.clone();
        let session_id = session_id.to_string();
        let message = message.clone();
        let execution = execution.clone();
        let new_context = new_context.clone();
        tokio::task::spawn_blocking(move || -> Result<u64, StoreError> {
            let mut conn =
                Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::Transient(e.to_string()))?;

            let seq = SqliteStore::next_seq(&tx, &session_id)?;
            SqliteStore::insert_message(&tx, &session_id, seq, &message)?;

            tx.execute(
                "INSERT INTO tool_executions
                    (session_id, tool_name, arguments, result, status, started_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    execution.session_id,
                    execution.tool_name,
                    serde_json::to_string(&execution.arguments)?,
                    serde_json::to_string(&execution.result)?,
                    tool_exec_status_str(execution.status),
                    execution.started_at,
                    execution.finished_at,
                ],
            )
            .map_err(|e| StoreError::Transient(e.to_string()))?;

            SqliteStore::touch_session(&tx, &session_id, &new_context)?;

            tx.commit().map_err(|e| StoreError::Transient(e.to_string()))?;
            Ok(seq)
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn update_session_state(
        &self,
        id: &str,
        expected_old_state: SessionState,
        new_state: SessionState,
        new_context: &ContextSnapshot,
    ) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        let new_context = new_context.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let ctx_json = serde_json::to_string(&new_context)?;
            let affected = conn
                .execute(
                    "UPDATE sessions SET state = ?1, context = ?2, updated_at = ?3
                     WHERE id = ?4 AND state = ?5",
                    params![
                        session_state_str(new_state),
                        ctx_json,
                        now_ms(),
                        id,
                        session_state_str(expected_old_state),
                    ],
                )
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            if affected == 0 {
                return Err(StoreError::StaleSession);
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn claim_instance(&self, instance_id: &str, session_id: &str) -> Result<bool, StoreError> {
        let db_path = self.db_path.clone();
        let instance_id = instance_id.to_string();
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            let mut conn =
                Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let affected = tx
                .execute(
                    "UPDATE agent_instances SET status = ?1, current_session_id = ?2
                     WHERE id = ?3 AND status IN (?4, ?5)",
                    params![
                        instance_status_str(InstanceStatus::Busy),
                        session_id,
                        instance_id,
                        instance_status_str(InstanceStatus::Idle),
                        instance_status_str(InstanceStatus::Starting),
                    ],
                )
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            if affected == 0 {
                return Ok(false);
            }
            let session_affected = tx
                .execute(
                    "UPDATE sessions SET instance_id = ?1, updated_at = ?2
                     WHERE id = ?3 AND instance_id IS NULL",
                    params![instance_id, now_ms(), session_id],
                )
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            if session_affected == 0 {
                tx.rollback().map_err(|e| StoreError::Transient(e.to_string()))?;
                return Ok(false);
            }
            tx.commit().map_err(|e| StoreError::Transient(e.to_string()))?;
            Ok(true)
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn release_instance(
        &self,
        instance_id: &str,
        outcome: ReleaseOutcome,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let instance_id = instance_id.to_string();
        let last_error = last_error.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn =
                Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let status = match outcome {
                ReleaseOutcome::Idle => InstanceStatus::Idle,
                ReleaseOutcome::Error => InstanceStatus::Error,
            };
            let bump_errors = matches!(outcome, ReleaseOutcome::Error) as i64;
            let held_session: Option<String> = tx
                .query_row(
                    "SELECT current_session_id FROM agent_instances WHERE id = ?1",
                    params![instance_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| StoreError::Transient(e.to_string()))?
                .flatten();
            tx.execute(
                "UPDATE agent_instances
                 SET status = ?1, current_session_id = NULL, sessions_count = sessions_count + 1,
                     errors_count = errors_count + ?2, last_error = COALESCE(?3, last_error),
                     last_error_at = CASE WHEN ?3 IS NOT NULL THEN ?4 ELSE last_error_at END
                 WHERE id = ?5",
                params![
                    instance_status_str(status),
                    bump_errors,
                    last_error,
                    now_ms(),
                    instance_id,
                ],
            )
            .map_err(|e| StoreError::Transient(e.to_string()))?;
            // Clear the session's instance pointer so `find_claimable_sessions`
            // can hand it to another worker (spec §4.7: release clears both
            // sides of the instance<->session binding).
            if let Some(session_id) = held_session {
                tx.execute(
                    "UPDATE sessions SET instance_id = NULL WHERE id = ?1 AND instance_id = ?2",
                    params![session_id, instance_id],
                )
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            }
            tx.commit().map_err(|e| StoreError::Transient(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn find_idle_instance(
        &self,
        template_id: &str,
    ) -> Result<Option<AgentInstance>, StoreError> {
        let db_path = self.db_path.clone();
        let template_id = template_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<AgentInstance>, StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM agent_instances
                     WHERE template_id = ?1 AND enabled = 1 AND status = ?2
                     ORDER BY priority DESC LIMIT 1",
                )
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let id: Option<String> = stmt
                .query_row(params![template_id, instance_status_str(InstanceStatus::Idle)], |r| {
                    r.get(0)
                })
                .optional()
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            drop(stmt);
            match id {
                Some(id) => Ok(Some(load_instance(&conn, &id)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn find_claimable_sessions(
        &self,
        template_version_id: &str,
    ) -> Result<Vec<Session>, StoreError> {
        let db_path = self.db_path.clone();
        let template_version_id = template_version_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<Session>, StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM sessions
                     WHERE template_version_id = ?1 AND state = ?2 AND instance_id IS NULL
                     ORDER BY updated_at ASC",
                )
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let ids: Vec<String> = stmt
                .query_map(
                    params![template_version_id, session_state_str(SessionState::Researching)],
                    |r| r.get(0),
                )
                .map_err(|e| StoreError::Transient(e.to_string()))?
                .collect::<Result<_, _>>()
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            drop(stmt);
            let mut sessions = Vec::with_capacity(ids.len());
            for id in ids {
                let (session, _) = load_session_sync(&conn, &id)?;
                sessions.push(session);
            }
            Ok(sessions)
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn get_instance(&self, id: &str) -> Result<AgentInstance, StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<AgentInstance, StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            load_instance(&conn, &id)
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn list_enabled_instances(&self) -> Result<Vec<AgentInstance>, StoreError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<AgentInstance>, StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let mut stmt = conn
                .prepare("SELECT id FROM agent_instances WHERE enabled = 1")
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let ids: Vec<String> = stmt
                .query_map([], |r| r.get(0))
                .map_err(|e| StoreError::Transient(e.to_string()))?
                .collect::<Result<_, _>>()
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            drop(stmt);
            ids.iter().map(|id| load_instance(&conn, id)).collect()
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn heartbeat_instance(&self, id: &str) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            conn.execute(
                "UPDATE agent_instances SET heartbeat_at = ?1 WHERE id = ?2",
                params![now_ms(), id],
            )
            .map_err(|e| StoreError::Transient(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn get_template(&self, id: &str) -> Result<Template, StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Template, StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            load_template(&conn, "id", &id)
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn get_template_by_name(&self, name: &str) -> Result<Option<Template>, StoreError> {
        let db_path = self.db_path.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Template>, StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            match load_template(&conn, "name", &name) {
                Ok(t) => Ok(Some(t)),
                Err(StoreError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn get_template_version(&self, id: &str) -> Result<TemplateVersion, StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<TemplateVersion, StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            load_template_version(&conn, &id)
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn list_active_template_versions(&self) -> Result<Vec<TemplateVersion>, StoreError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<TemplateVersion>, StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let mut stmt = conn
                .prepare("SELECT id FROM template_versions WHERE active = 1")
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let ids: Vec<String> = stmt
                .query_map([], |r| r.get(0))
                .map_err(|e| StoreError::Transient(e.to_string()))?
                .collect::<Result<_, _>>()
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            drop(stmt);
            ids.iter().map(|id| load_template_version(&conn, id)).collect()
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn get_tool(&self, name: &str) -> Result<Option<ToolRecord>, StoreError> {
        let db_path = self.db_path.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<ToolRecord>, StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            load_tool_by_name(&conn, &name)
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn list_tools(&self, names: &[String]) -> Result<Vec<ToolRecord>, StoreError> {
        let db_path = self.db_path.clone();
        let names = names.to_vec();
        tokio::task::spawn_blocking(move || -> Result<Vec<ToolRecord>, StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let mut out = Vec::with_capacity(names.len());
            for name in &names {
                if let Some(t) = load_tool_by_name(&conn, name)? {
                    out.push(t);
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn list_sessions(&self, limit: u32) -> Result<Vec<Session>, StoreError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Session>, StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM sessions ORDER BY updated_at DESC LIMIT ?1",
                )
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let ids: Vec<String> = stmt
                .query_map(params![limit], |r| r.get(0))
                .map_err(|e| StoreError::Transient(e.to_string()))?
                .collect::<Result<_, _>>()
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            drop(stmt);
            ids.iter()
                .map(|id| load_session_sync(&conn, id).map(|(s, _)| s))
                .collect()
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn rename_session(&self, id: &str, title: &str) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        let title = title.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let affected = conn
                .execute(
                    "UPDATE sessions SET title = ?1, updated_at = ?2 WHERE id = ?3",
                    params![title, now_ms(), id],
                )
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let affected = tx
                .execute("DELETE FROM sessions WHERE id = ?1", params![id])
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            tx.execute(
                "DELETE FROM session_messages WHERE session_id = ?1",
                params![id],
            )
            .map_err(|e| StoreError::Transient(e.to_string()))?;
            tx.execute(
                "DELETE FROM tool_executions WHERE session_id = ?1",
                params![id],
            )
            .map_err(|e| StoreError::Transient(e.to_string()))?;
            tx.commit().map_err(|e| StoreError::Transient(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn upsert_template(&self, template: &Template) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let template = template.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            conn.execute(
                "INSERT OR REPLACE INTO templates (id, name, description, active_version_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    template.id,
                    template.name,
                    template.description,
                    template.active_version_id,
                ],
            )
            .map_err(|e| StoreError::Transient(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn upsert_template_version(&self, version: &TemplateVersion) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let version = version.clone();
        let settings = serde_json::to_string(&version.settings)?;
        let tool_names = serde_json::to_string(&version.tool_names)?;
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            conn.execute(
                "INSERT OR REPLACE INTO template_versions
                    (id, template_id, version, settings, tool_names, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    version.id,
                    version.template_id,
                    version.version,
                    settings,
                    tool_names,
                    version.active,
                ],
            )
            .map_err(|e| StoreError::Transient(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn upsert_tool(&self, tool: &ToolRecord) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let tool = tool.clone();
        let config = serde_json::to_string(&tool.config)?;
        let embedding = tool.embedding.as_ref().map(serde_json::to_string).transpose()?;
        let category = tool_category_str(tool.category);
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            conn.execute(
                "INSERT OR REPLACE INTO tools
                    (id, name, description, entrypoint, config, embedding, category, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    tool.id,
                    tool.name,
                    tool.description,
                    tool.entrypoint,
                    config,
                    embedding,
                    category,
                    tool.active,
                ],
            )
            .map_err(|e| StoreError::Transient(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }

    async fn upsert_instance(&self, instance: &AgentInstance) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let instance = instance.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = Connection::open_with_flags(&db_path, open_flags())
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            conn.execute(
                "INSERT OR REPLACE INTO agent_instances
                    (id, name, display_name, template_id, template_version_id, status,
                     current_session_id, enabled, auto_start, priority, heartbeat_at,
                     sessions_count, messages_count, tool_calls_count, errors_count,
                     last_error, last_error_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    instance.id,
                    instance.name,
                    instance.display_name,
                    instance.template_id,
                    instance.template_version_id,
                    instance_status_str(instance.status),
                    instance.current_session_id,
                    instance.enabled,
                    instance.auto_start,
                    instance.priority,
                    instance.heartbeat_at,
                    instance.sessions_count as i64,
                    instance.messages_count as i64,
                    instance.tool_calls_count as i64,
                    instance.errors_count as i64,
                    instance.last_error,
                    instance.last_error_at,
                ],
            )
            .map_err(|e| StoreError::Transient(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Transient(e.to_string()))?
    }
}

fn tool_category_str(c: crate::domain::ToolCategory) -> &'static str {
    match c {
        crate::domain::ToolCategory::Research => "research",
        crate::domain::ToolCategory::Memory => "memory",
        crate::domain::ToolCategory::Utility => "utility",
    }
}

fn tool_exec_status_str(s: ToolExecutionStatus) -> &'static str {
    match s {
        ToolExecutionStatus::Ok => "ok",
        ToolExecutionStatus::Error => "error",
        ToolExecutionStatus::Timeout => "timeout",
    }
}

fn load_session_sync(conn: &Connection, id: &str) -> Result<(Session, Vec<SessionMessage>), StoreError> {
    let (template_version_id, instance_id, title, state, context, created_at, updated_at): (
        String,
        Option<String>,
        String,
        String,
        String,
        i64,
        i64,
    ) = conn
        .query_row(
            "SELECT template_version_id, instance_id, title, state, context, created_at, updated_at
             FROM sessions WHERE id = ?1",
            params![id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            },
        )
        .optional()
        .map_err(|e| StoreError::Transient(e.to_string()))?
        .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
    Ok((
        Session {
            id: id.to_string(),
            template_version_id,
            instance_id,
            title,
            state: session_state_from_str(&state),
            context: serde_json::from_str(&context)?,
            created_at,
            updated_at,
        },
        Vec::new(),
    ))
}

fn load_instance(conn: &Connection, id: &str) -> Result<AgentInstance, StoreError> {
    conn.query_row(
        "SELECT id, name, display_name, template_id, template_version_id, status,
                current_session_id, enabled, auto_start, priority, heartbeat_at,
                sessions_count, messages_count, tool_calls_count, errors_count,
                last_error, last_error_at
         FROM agent_instances WHERE id = ?1",
        params![id],
        |r| {
            Ok(AgentInstance {
                id: r.get(0)?,
                name: r.get(1)?,
                display_name: r.get(2)?,
                template_id: r.get(3)?,
                template_version_id: r.get(4)?,
                status: instance_status_from_str(&r.get::<_, String>(5)?),
                current_session_id: r.get(6)?,
                enabled: r.get(7)?,
                auto_start: r.get(8)?,
                priority: r.get(9)?,
                heartbeat_at: r.get(10)?,
                sessions_count: r.get::<_, i64>(11)? as u64,
                messages_count: r.get::<_, i64>(12)? as u64,
                tool_calls_count: r.get::<_, i64>(13)? as u64,
                errors_count: r.get::<_, i64>(14)? as u64,
                last_error: r.get(15)?,
                last_error_at: r.get(16)?,
            })
        },
    )
    .optional()
    .map_err(|e| StoreError::Transient(e.to_string()))?
    .ok_or_else(|| StoreError::NotFound(format!("instance {id}")))
}

fn load_template(conn: &Connection, by: &str, value: &str) -> Result<Template, StoreError> {
    let sql = format!("SELECT id, name, description, active_version_id FROM templates WHERE {by} = ?1");
    conn.query_row(&sql, params![value], |r| {
        Ok(Template {
            id: r.get(0)?,
            name: r.get(1)?,
            description: r.get(2)?,
            active_version_id: r.get(3)?,
        })
    })
    .optional()
    .map_err(|e| StoreError::Transient(e.to_string()))?
    .ok_or_else(|| StoreError::NotFound(format!("template {value}")))
}

fn load_template_version(conn: &Connection, id: &str) -> Result<TemplateVersion, StoreError> {
    let (template_id, version, settings, tool_names, active): (String, i64, String, String, bool) =
        conn.query_row(
            "SELECT template_id, version, settings, tool_names, active
             FROM template_versions WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(|e| StoreError::Transient(e.to_string()))?
        .ok_or_else(|| StoreError::NotFound(format!("template_version {id}")))?;
    Ok(TemplateVersion {
        id: id.to_string(),
        template_id,
        version: version as u32,
        settings: serde_json::from_str(&settings)?,
        tool_names: serde_json::from_str(&tool_names)?,
        active,
    })
}

fn load_tool_by_name(conn: &Connection, name: &str) -> Result<Option<ToolRecord>, StoreError> {
    conn.query_row(
        "SELECT id, name, description, entrypoint, config, embedding, category, active
         FROM tools WHERE name = ?1 COLLATE NOCASE",
        params![name],
        |r| {
            let category: String = r.get(6)?;
            let embedding: Option<String> = r.get(5)?;
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                embedding,
                category,
                r.get::<_, bool>(7)?,
            ))
        },
    )
    .optional()
    .map_err(|e| StoreError::Transient(e.to_string()))?
    .map(|(id, name, description, entrypoint, config, embedding, category, active)| {
        Ok(ToolRecord {
            id,
            name,
            description,
            entrypoint,
            config: serde_json::from_str(&config)?,
            embedding: embedding.map(|e| serde_json::from_str(&e)).transpose()?,
            category: serde_json::from_str(&format!("\"{category}\""))?,
            active,
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::new(":memory:").unwrap()
    }

    #[tokio::test]
    async fn create_session_starts_inited_with_user_message() {
        let s = store();
        let session = s
            .create_session("tv-1", "task", "what is 2+2?")
            .await
            .unwrap();
        assert_eq!(session.state, SessionState::Inited);
        let (loaded, messages) = s.load_session(&session.id).await.unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].seq, 0);
        assert_eq!(messages[0].content, "what is 2+2?");
    }

    #[tokio::test]
    async fn update_session_state_cas_rejects_stale_expected_state() {
        let s = store();
        let session = s.create_session("tv-1", "t", "hi").await.unwrap();
        s.update_session_state(
            &session.id,
            SessionState::Inited,
            SessionState::Researching,
            &ContextSnapshot::default(),
        )
        .await
        .unwrap();

        let err = s
            .update_session_state(
                &session.id,
                SessionState::Inited,
                SessionState::Researching,
                &ContextSnapshot::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaleSession));
    }

    #[tokio::test]
    async fn append_message_assigns_gap_free_sequence() {
        let s = store();
        let session = s.create_session("tv-1", "t", "hi").await.unwrap();
        let msg = SessionMessage {
            session_id: session.id.clone(),
            seq: 0,
            role: MessageRole::Assistant,
            content: "ok".into(),
            tool_calls: vec![],
            tool_call_id: None,
            message_type: MessageType::Message,
            step: None,
            step_data: None,
        };
        let seq1 = s.append_message(&session.id, &msg).await.unwrap();
        let seq2 = s.append_message(&session.id, &msg).await.unwrap();
        assert_eq!(seq1, 1);
        assert_eq!(seq2, 2);
    }
}
