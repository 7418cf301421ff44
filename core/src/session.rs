//! Session Service (§4.6, `C6`): create/resume sessions, append messages,
//! persist the context snapshot, and drive the session state machine's
//! INITED/WAITING_FOR_CLARIFICATION transitions. The Agent Loop Driver
//! (`C8`) owns the RESEARCHING → COMPLETED/FAILED transitions; this module
//! owns everything that happens outside a running step.

use std::sync::Arc;

use crate::domain::{
    ContextSnapshot, MessageRole, MessageType, Session, SessionMessage, SessionState,
    TemplateVersion, ToolCallRequest, ToolRecord,
};
use crate::error::StoreError;
use crate::selector::{self};
use crate::store::Store;

/// Replaces `{message}` in a prompt template with the given text. Prompt
/// templates carry no other placeholders at the session-service layer —
/// `{available_tools}` is expanded by the caller before the template string
/// reaches here (it needs the resolved tool list, which this module doesn't
/// own), via [`render_available_tools`].
fn render_message(template: &str, message: &str) -> String {
    if template.contains("{message}") {
        template.replace("{message}", message)
    } else if template.is_empty() {
        message.to_string()
    } else {
        format!("{template}\n\n{message}")
    }
}

/// Expands `{available_tools}` in a system prompt into a human-readable
/// listing of the tools the LLM may call this step (§4.6).
pub fn render_available_tools(system_prompt: &str, tools: &[ToolRecord]) -> String {
    let listing = tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");
    if system_prompt.contains("{available_tools}") {
        system_prompt.replace("{available_tools}", &listing)
    } else {
        format!("{system_prompt}\n\nAvailable tools:\n{listing}")
    }
}

pub struct SessionService {
    store: Arc<dyn Store>,
}

impl SessionService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// §4.6 `StartSession`: creates the session INITED, appends the system
    /// message (tool listing expanded for the first step's selection) and
    /// the rendered initial user message, then transitions to RESEARCHING
    /// so an Instance Pool worker can claim it.
    ///
    /// `first_step_tools` is the selector's output for iteration 0 — callers
    /// typically compute it via [`crate::selector::select_tools`] against an
    /// empty [`ContextSnapshot`] before calling this.
    pub async fn start_session(
        &self,
        template_version: &TemplateVersion,
        first_step_tools: &[ToolRecord],
        task_text: &str,
        title: &str,
    ) -> Result<Session, StoreError> {
        let prompts = &template_version.settings.prompts;
        let rendered_user = render_message(&prompts.initial_user, task_text);
        let rendered_system = render_available_tools(&prompts.system, first_step_tools);

        let session = self
            .store
            .create_session(&template_version.id, title, &rendered_user)
            .await?;

        let system_message = SessionMessage {
            session_id: session.id.clone(),
            seq: 0, // assigned by the store; caller never reads this field back
            role: MessageRole::System,
            content: rendered_system,
            tool_calls: Vec::new(),
            tool_call_id: None,
            message_type: MessageType::Message,
            step: None,
            step_data: None,
        };
        self.store.append_message(&session.id, &system_message).await?;

        self.store
            .update_session_state(
                &session.id,
                SessionState::Inited,
                SessionState::Researching,
                &session.context,
            )
            .await?;

        Ok(Session {
            state: SessionState::Researching,
            ..session
        })
    }

    /// §4.6 `ResumeWithClarification`. The CAS happens *before* the message
    /// is appended so that of two concurrent callers racing the same
    /// session, only the CAS winner ever appends anything — satisfying the
    /// resumption-idempotence law (§8): exactly one accepted transition,
    /// the other fails `stale_session` having mutated nothing.
    pub async fn resume_with_clarification(
        &self,
        session_id: &str,
        user_message: &str,
        clarification_prompt: &str,
    ) -> Result<Session, StoreError> {
        let (session, _messages) = self.store.load_session(session_id).await?;
        if session.state != SessionState::WaitingForClarification {
            return Err(StoreError::StaleSession);
        }

        let mut context = session.context.clone();
        context.clarifications_used += 1;

        self.store
            .update_session_state(
                session_id,
                SessionState::WaitingForClarification,
                SessionState::Researching,
                &context,
            )
            .await?;

        let rendered = render_message(clarification_prompt, user_message);
        let message = SessionMessage {
            session_id: session_id.to_string(),
            seq: 0,
            role: MessageRole::User,
            content: rendered,
            tool_calls: Vec::new(),
            tool_call_id: None,
            message_type: MessageType::Message,
            step: None,
            step_data: None,
        };
        self.store.append_message(session_id, &message).await?;

        Ok(Session {
            state: SessionState::Researching,
            context,
            ..session
        })
    }

    /// §4.6: appends the assistant's tool_calls and the matching tool
    /// results as one logical pair (each a separate store row; the driver's
    /// actual atomic unit per-call is [`Store::record_tool_execution`],
    /// which this delegates the context/usage bookkeeping to).
    pub async fn append_assistant_with_tool_calls(
        &self,
        session_id: &str,
        step: u32,
        assistant_content: &str,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Result<u64, StoreError> {
        let message = SessionMessage {
            session_id: session_id.to_string(),
            seq: 0,
            role: MessageRole::Assistant,
            content: assistant_content.to_string(),
            tool_calls,
            tool_call_id: None,
            message_type: MessageType::ToolCall,
            step: Some(step),
            step_data: None,
        };
        self.store.append_message(session_id, &message).await
    }

    pub async fn snapshot(
        &self,
        session_id: &str,
        expected_state: SessionState,
        new_context: &ContextSnapshot,
    ) -> Result<(), StoreError> {
        self.store
            .update_session_state(session_id, expected_state, expected_state, new_context)
            .await
    }
}

/// Builds the retrieval query and resolves the selector against the
/// template version's currently-active tools for the *first* step of a new
/// session (iteration 0, no prior reasoning, no stage label yet).
pub fn select_first_step_tools(
    catalog_tools: &[ToolRecord],
    template_version: &TemplateVersion,
    task_text: &str,
    query_embedding: Option<&[f32]>,
) -> Result<Vec<ToolRecord>, crate::error::SelectorError> {
    let context = ContextSnapshot::default();
    let _query = selector::build_query(task_text, &context);
    selector::select_tools(
        catalog_tools,
        template_version,
        &context,
        SessionState::Inited,
        query_embedding,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_message_replaces_placeholder() {
        assert_eq!(
            render_message("Task: {message}", "find the bug"),
            "Task: find the bug"
        );
    }

    #[test]
    fn render_message_falls_back_to_concatenation() {
        assert_eq!(
            render_message("Context preamble", "the task"),
            "Context preamble\n\nthe task"
        );
    }

    #[test]
    fn render_available_tools_lists_name_and_description() {
        let tools = vec![ToolRecord {
            id: "1".into(),
            name: "FinalAnswerTool".into(),
            description: "finish up".into(),
            entrypoint: "builtin".into(),
            config: serde_json::json!({}),
            embedding: None,
            category: crate::domain::ToolCategory::Utility,
            active: true,
        }];
        let rendered = render_available_tools("System prompt. {available_tools}", &tools);
        assert!(rendered.contains("FinalAnswerTool: finish up"));
    }
}
