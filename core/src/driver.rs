//! Agent Loop Driver (§4.8, `C8`): the re-entrant Reason → Select → Act →
//! Record loop a worker runs against one claimed session. Non-blocking on
//! clarification — the loop `return`s out to the caller (the Instance
//! Pool, `C7`) rather than block an in-process event (§9 "blocking-wait →
//! durable suspension"), so every field the next iteration needs lives in
//! [`crate::domain::ContextSnapshot`], never on `self` or a local.
//!
//! Follows the three-phase `think_node`/`act_node`/
//! `observe_node` shape, reworked from an in-process `StateGraph` cycle
//! into a suspend-to-storage loop, per DESIGN.md.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agentd_protocol::{StepEndStatus, StepEvent, StepStartStatus};
use tokio::sync::{mpsc, Semaphore};

use crate::domain::{
    ContextSnapshot, MessageRole, MessageType, ReasoningStrategy, SelectionStrategy, Session,
    SessionMessage, SessionState, TemplateVersion, ToolCallRequest, ToolExecution,
    ToolExecutionStatus, ToolRecord, ToolUsageCounter,
};
use crate::error::{DriverError, LlmError, StoreError};
use crate::llm::{ChatOptions, LlmClient, LlmMessage, LlmRole, ToolChoice};
use crate::retry::{retry_with_backoff, LLM_BACKOFF, STORE_BACKOFF};
use crate::selector::{self, Embedder};
use crate::session::render_available_tools;
use crate::store::Store;
use crate::tools::{quota_for, ToolCatalog, ToolInvocationOutcome};

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// How a call to [`Driver::run`] ended. Both are normal, successful returns
/// from the worker's point of view — only [`DriverError`] represents a
/// fault the Instance Pool must react to (§4.7 "Auto-recover").
#[derive(Debug)]
pub enum RunOutcome {
    /// Entered WAITING_FOR_CLARIFICATION, or the loop was asked to shut
    /// down between steps; either way the worker releases the instance and
    /// the session remains claimable (§4.6, §5).
    Suspended(Session),
    /// Reached COMPLETED or FAILED.
    Finished(Session),
}

/// Runs the agent loop against one claimed session (§4.8). Stateless across
/// calls beyond its collaborators — `Arc`-shared so one instance can be
/// reused by every worker in the Instance Pool.
pub struct Driver {
    store: Arc<dyn Store>,
    llm: Arc<dyn LlmClient>,
    catalog: Arc<ToolCatalog>,
    embedder: Option<Arc<dyn Embedder>>,
}

/// Caps concurrent tool executions within one step (§4.8, §5: "up to N=4
/// concurrent tool executions per step").
const MAX_PARALLEL_TOOL_CALLS: usize = 4;

impl Driver {
    pub fn new(
        store: Arc<dyn Store>,
        llm: Arc<dyn LlmClient>,
        catalog: Arc<ToolCatalog>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            store,
            llm,
            catalog,
            embedder,
        }
    }

    /// Runs `session` (already RESEARCHING, already claimed by the caller's
    /// instance) to completion, suspension, or a [`DriverError`]. `task_text`
    /// is the text the retrieval query is built from (§4.4 step 4a); callers
    /// already have it from the session's first user message. `shutdown` is
    /// checked once per iteration (§5 "process shutdown (worker drains the
    /// current step, persists, then stops)") — a flag flipped mid-step has
    /// no effect until the step currently in flight finishes.
    pub async fn run(
        &self,
        mut session: Session,
        template_version: &TemplateVersion,
        catalog_tools: &[ToolRecord],
        task_text: &str,
        events: &mpsc::Sender<StepEvent>,
        shutdown: &AtomicBool,
    ) -> Result<RunOutcome, DriverError> {
        let policy = &template_version.settings.execution;
        let (_, mut history) = self.store.load_session(&session.id).await?;

        if session.context.started_at.is_none() {
            session.context.started_at = Some(now_ms());
        }

        loop {
            let step_started_at = now_ms();
            if shutdown.load(Ordering::Relaxed) {
                // Leaves state/context exactly as last persisted; the
                // session stays RESEARCHING and is claimable by the next
                // worker to start (§5, §7 — same outcome shape as a clean
                // `StaleSession` abort, just not an error).
                return Ok(RunOutcome::Suspended(session));
            }
            if session.context.iteration >= policy.max_iterations {
                return self
                    .finalize(
                        &mut session,
                        SessionState::Failed,
                        "iteration_limit",
                        "length",
                        step_started_at,
                        events,
                    )
                    .await;
            }
            let elapsed_ms = now_ms() - session.context.started_at.unwrap_or_else(now_ms);
            if elapsed_ms >= (policy.time_budget_seconds as i64) * 1000 {
                return self
                    .finalize(
                        &mut session,
                        SessionState::Failed,
                        "time_budget_exceeded",
                        "length",
                        step_started_at,
                        events,
                    )
                    .await;
            }

            session.context.iteration += 1;
            let step = session.context.iteration;
            let max_steps = policy.max_iterations;

            events
                .send(StepEvent::StepStart {
                    step,
                    max_steps,
                    description: session
                        .context
                        .stage
                        .clone()
                        .unwrap_or_else(|| "researching".to_string()),
                    status: StepStartStatus::Running,
                })
                .await
                .ok();

            // 1. Reasoning phase.
            let tools = self
                .select_tools(catalog_tools, template_version, &session, task_text)
                .await?;
            let rendered_system =
                render_available_tools(&template_version.settings.prompts.system, &tools);

            if let Some(fallback) = self
                .run_reasoning_phase(
                    template_version,
                    &session.id,
                    step,
                    &rendered_system,
                    &history,
                    events,
                    &mut session.context,
                )
                .await?
            {
                return self
                    .finalize_with_answer(&mut session, fallback, "length", step_started_at, events)
                    .await;
            }
            // reload the persisted tail so the selection phase sees any
            // reasoning-phase messages just appended.
            let (_, refreshed) = self.store.load_session(&session.id).await?;
            history = refreshed;

            // 2. Selection phase.
            let llm_messages = build_llm_messages(&rendered_system, &history);
            let schemas = self.catalog.describe(&tools);
            let select_opts = ChatOptions {
                tools: schemas,
                tool_choice: ToolChoice::Required,
                parallel_tool_calls: true,
                temperature: template_version.settings.llm.temperature,
                max_tokens: template_version.settings.llm.max_tokens,
                timeout: remaining_call_timeout(&session.context, policy.time_budget_seconds),
            };
            let selection = match retry_with_backoff(
                LLM_BACKOFF,
                |e: &LlmError| matches!(e, LlmError::Transient(_)),
                || self.llm.chat(&llm_messages, &select_opts, None),
            )
            .await
            {
                Ok(turn) => turn,
                Err(_) => {
                    return self
                        .finalize(
                            &mut session,
                            SessionState::Failed,
                            "llm_error",
                            "stop",
                            step_started_at,
                            events,
                        )
                        .await;
                }
            };

            if selection.tool_calls.is_empty() {
                // LLMInvariant (§7): the model refused to emit a tool_call
                // under `tool_choice=required`. Synthesize a failed final
                // answer from whatever text it did produce.
                let answer = if selection.content.is_empty() {
                    "the model did not select a tool".to_string()
                } else {
                    selection.content.clone()
                };
                return self
                    .finalize_with_answer(&mut session, answer, "stop", step_started_at, events)
                    .await;
            }

            let tool_calls: Vec<ToolCallRequest> = selection
                .tool_calls
                .iter()
                .enumerate()
                .map(|(idx, tc)| ToolCallRequest {
                    id: format!("{step}-select-{idx}"),
                    tool_name: tc.tool_name.clone(),
                    arguments: tc.arguments.clone(),
                })
                .collect();

            let has_clarification = tool_calls
                .iter()
                .any(|tc| tc.tool_name.eq_ignore_ascii_case("ClarificationTool"));
            if has_clarification && tool_calls.len() > 1 {
                // §9 resolved Open Question: ClarificationTool must be the
                // sole tool_call; a mix is rejected as an error.
                events
                    .send(StepEvent::Error {
                        step: Some(step),
                        message: "ClarificationTool cannot co-occur with other tool calls".into(),
                    })
                    .await
                    .ok();
                return self
                    .finalize(
                        &mut session,
                        SessionState::Failed,
                        "clarification_mixed",
                        "stop",
                        step_started_at,
                        events,
                    )
                    .await;
            }

            self.store_call(|| {
                self.store.append_message(
                    &session.id,
                    &SessionMessage {
                        session_id: session.id.clone(),
                        seq: 0,
                        role: MessageRole::Assistant,
                        content: selection.content.clone(),
                        tool_calls: tool_calls.clone(),
                        tool_call_id: None,
                        message_type: MessageType::ToolCall,
                        step: Some(step),
                        step_data: None,
                    },
                )
            })
            .await?;

            if has_clarification {
                let questions = tool_calls[0].arguments.clone();
                self.store_call(|| {
                    self.store.append_message(
                        &session.id,
                        &SessionMessage {
                            session_id: session.id.clone(),
                            seq: 0,
                            role: MessageRole::Tool,
                            content: serde_json::to_string(&questions).unwrap_or_default(),
                            tool_calls: Vec::new(),
                            tool_call_id: Some(tool_calls[0].id.clone()),
                            message_type: MessageType::ToolResult,
                            step: Some(step),
                            step_data: None,
                        },
                    )
                })
                .await?;

                session.context.clarifications_used += 1;
                self.store_call(|| {
                    self.store.update_session_state(
                        &session.id,
                        SessionState::Researching,
                        SessionState::WaitingForClarification,
                        &session.context,
                    )
                })
                .await?;
                session.state = SessionState::WaitingForClarification;

                events
                    .send(StepEvent::StepEnd {
                        step,
                        status: StepEndStatus::Completed,
                        duration_ms: (now_ms() - step_started_at).max(0) as u64,
                    })
                    .await
                    .ok();
                return Ok(RunOutcome::Suspended(session));
            }

            // 3. Action phase.
            if let Some(outcome) = self
                .run_action_phase(
                    template_version,
                    &mut session,
                    step,
                    step_started_at,
                    &tool_calls,
                    events,
                )
                .await?
            {
                return Ok(outcome);
            }

            events
                .send(StepEvent::StepEnd {
                    step,
                    status: StepEndStatus::Completed,
                    duration_ms: (now_ms() - step_started_at).max(0) as u64,
                })
                .await
                .ok();

            let (_, refreshed) = self.store.load_session(&session.id).await?;
            history = refreshed;
        }
    }

    /// Resolves the retrieval query embedding, if the template version's
    /// tool policy asks for it, then delegates to [`selector::select_tools`]
    /// for the actual candidate/rules/ranking pipeline (§4.4).
    async fn select_tools(
        &self,
        catalog_tools: &[ToolRecord],
        template_version: &TemplateVersion,
        session: &Session,
        task_text: &str,
    ) -> Result<Vec<ToolRecord>, DriverError> {
        let needs_embedding = template_version.settings.tool_policy.selection_strategy
            == SelectionStrategy::Retrieval;
        let query_embedding = if needs_embedding {
            if let Some(embedder) = &self.embedder {
                let query = selector::build_query(task_text, &session.context);
                Some(embedder.embed(&query).await?)
            } else {
                None
            }
        } else {
            None
        };
        Ok(selector::select_tools(
            catalog_tools,
            template_version,
            &session.context,
            session.state,
            query_embedding.as_deref(),
        )?)
    }

    /// Runs the reasoning phase appropriate to the template version's
    /// `base_class` (§9's tagged sum of agent variants — the reasoning
    /// phase is the only thing that differs between them). Returns
    /// `Some(answer)` if the reasoning call itself failed unrecoverably
    /// (LLMInvariant fallback) and the caller should finalize the session
    /// as FAILED with that answer instead of continuing to selection.
    #[allow(clippy::too_many_arguments)]
    async fn run_reasoning_phase(
        &self,
        template_version: &TemplateVersion,
        session_id: &str,
        step: u32,
        rendered_system: &str,
        history: &[SessionMessage],
        events: &mpsc::Sender<StepEvent>,
        context: &mut ContextSnapshot,
    ) -> Result<Option<String>, DriverError> {
        match template_version.settings.base_class {
            ReasoningStrategy::Simple => Ok(None),
            ReasoningStrategy::StructuredOutput => {
                let llm_messages = build_llm_messages(rendered_system, history);
                let opts = ChatOptions {
                    tools: Vec::new(),
                    tool_choice: ToolChoice::Auto,
                    parallel_tool_calls: false,
                    temperature: template_version.settings.llm.temperature,
                    max_tokens: template_version.settings.llm.max_tokens,
                    timeout: remaining_call_timeout(
                        context,
                        template_version.settings.execution.time_budget_seconds,
                    ),
                };
                let (tx, mut rx) = mpsc::channel::<String>(16);
                let events_clone = events.clone();
                let forward = tokio::spawn(async move {
                    while let Some(delta) = rx.recv().await {
                        events_clone.send(StepEvent::Message { content: delta }).await.ok();
                    }
                });
                let turn = match retry_with_backoff(
                    LLM_BACKOFF,
                    |e: &LlmError| matches!(e, LlmError::Transient(_)),
                    || self.llm.chat(&llm_messages, &opts, Some(tx.clone())),
                )
                .await
                {
                    Ok(turn) => turn,
                    Err(_) => {
                        drop(tx);
                        forward.await.ok();
                        return Ok(Some("reasoning call failed".to_string()));
                    }
                };
                drop(tx);
                forward.await.ok();

                context.last_reasoning = Some(turn.content.clone());
                events
                    .send(StepEvent::Thinking {
                        step,
                        text: turn.content.clone(),
                    })
                    .await
                    .ok();
                Ok(None)
            }
            ReasoningStrategy::ForcedReasoningTool => {
                let llm_messages = build_llm_messages(rendered_system, history);
                let reasoning_schema = self.catalog.describe(&[reasoning_tool_record()]);
                let opts = ChatOptions {
                    tools: reasoning_schema,
                    tool_choice: ToolChoice::Forced("ReasoningTool".to_string()),
                    parallel_tool_calls: false,
                    temperature: template_version.settings.llm.temperature,
                    max_tokens: template_version.settings.llm.max_tokens,
                    timeout: remaining_call_timeout(
                        context,
                        template_version.settings.execution.time_budget_seconds,
                    ),
                };
                let turn = match retry_with_backoff(
                    LLM_BACKOFF,
                    |e: &LlmError| matches!(e, LlmError::Transient(_)),
                    || self.llm.chat(&llm_messages, &opts, None),
                )
                .await
                {
                    Ok(turn) => turn,
                    Err(_) => return Ok(Some("reasoning call failed".to_string())),
                };
                let Some(call) = turn.tool_calls.first() else {
                    return Ok(Some(if turn.content.is_empty() {
                        "model did not call ReasoningTool".to_string()
                    } else {
                        turn.content
                    }));
                };
                let tool_call_id = format!("{step}-reason-0");
                let rationale = call
                    .arguments
                    .get("rationale")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();

                self.store_call(|| {
                    self.store.append_message(
                        session_id,
                        &SessionMessage {
                            session_id: session_id.to_string(),
                            seq: 0,
                            role: MessageRole::Assistant,
                            content: turn.content.clone(),
                            tool_calls: vec![ToolCallRequest {
                                id: tool_call_id.clone(),
                                tool_name: "ReasoningTool".to_string(),
                                arguments: call.arguments.clone(),
                            }],
                            tool_call_id: None,
                            message_type: MessageType::ToolCall,
                            step: Some(step),
                            step_data: None,
                        },
                    )
                })
                .await?;

                let Some(tool) = self.catalog.get("ReasoningTool") else {
                    return Ok(Some("ReasoningTool is not registered".to_string()));
                };
                let result = tool
                    .execute(context, call.arguments.clone())
                    .await
                    .map(|r| r.value)
                    .unwrap_or_else(|e| serde_json::json!({"error": e.to_string()}));

                self.store_call(|| {
                    self.store.append_message(
                        session_id,
                        &SessionMessage {
                            session_id: session_id.to_string(),
                            seq: 0,
                            role: MessageRole::Tool,
                            content: serde_json::to_string(&result).unwrap_or_default(),
                            tool_calls: Vec::new(),
                            tool_call_id: Some(tool_call_id.clone()),
                            message_type: MessageType::ToolResult,
                            step: Some(step),
                            step_data: None,
                        },
                    )
                })
                .await?;

                context.last_reasoning = Some(rationale.clone());
                events
                    .send(StepEvent::Thinking {
                        step,
                        text: rationale,
                    })
                    .await
                    .ok();
                Ok(None)
            }
        }
    }

    /// Executes the selected tool_calls (§4.8 Action phase). Returns
    /// `Some(RunOutcome::Finished(..))` if a `FinalAnswerTool` call
    /// terminated the session this step.
    #[allow(clippy::too_many_arguments)]
    async fn run_action_phase(
        &self,
        template_version: &TemplateVersion,
        session: &mut Session,
        step: u32,
        step_started_at: i64,
        tool_calls: &[ToolCallRequest],
        events: &mpsc::Sender<StepEvent>,
    ) -> Result<Option<RunOutcome>, DriverError> {
        let policy = &template_version.settings.tool_policy;
        let mut local_usage: HashMap<String, ToolUsageCounter> = session.context.tool_usage.clone();
        let mut decisions = Vec::with_capacity(tool_calls.len());
        let now = now_ms();
        for tc in tool_calls {
            let quota = quota_for(&policy.per_tool_quotas, &tc.tool_name).into_owned();
            let counter = local_usage.entry(tc.tool_name.clone()).or_default().clone();
            let exceeds_quota = quota
                .max_calls
                .map(|max| counter.calls >= max)
                .unwrap_or(false);
            let in_cooldown = quota
                .cooldown_seconds
                .zip(counter.last_call_at)
                .map(|(cooldown, last)| now - last < (cooldown as i64) * 1000)
                .unwrap_or(false);
            let rejected = exceeds_quota || in_cooldown;
            if !rejected {
                let entry = local_usage.get_mut(&tc.tool_name).unwrap();
                entry.calls += 1;
                entry.last_call_at = Some(now);
            }
            decisions.push((quota, counter, rejected));
        }

        let sem = Arc::new(Semaphore::new(MAX_PARALLEL_TOOL_CALLS));
        let mut handles = Vec::with_capacity(tool_calls.len());
        for (idx, tc) in tool_calls.iter().enumerate() {
            let (quota, counter, rejected) = decisions[idx].clone();
            let catalog = self.catalog.clone();
            let sem = sem.clone();
            let record = ToolRecord {
                id: tc.tool_name.clone(),
                name: tc.tool_name.clone(),
                description: String::new(),
                entrypoint: "builtin".into(),
                config: serde_json::json!({}),
                embedding: None,
                category: crate::domain::ToolCategory::Utility,
                active: true,
            };
            let ctx = session.context.clone();
            let args = tc.arguments.clone();
            handles.push(tokio::spawn(async move {
                if rejected {
                    let reason = if quota
                        .max_calls
                        .map(|m| counter.calls >= m)
                        .unwrap_or(false)
                    {
                        "quota_exceeded"
                    } else {
                        "cooldown"
                    };
                    return ToolInvocationOutcome {
                        status: ToolExecutionStatus::Error,
                        value: serde_json::json!({"error": reason}),
                        invoked: false,
                    };
                }
                let _permit = sem.acquire_owned().await.ok();
                catalog
                    .invoke(&record, &quota, &counter, &ctx, args, now_ms())
                    .await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.map_err(|e| DriverError::WorkerFault(e.to_string()))?);
        }

        for (idx, tc) in tool_calls.iter().enumerate() {
            let outcome = &results[idx];
            let success = outcome.status == ToolExecutionStatus::Ok;
            let finished_at = now_ms();
            let duration_ms = (finished_at - now).max(0) as u64;
            events
                .send(StepEvent::ToolCall {
                    step,
                    tool_name: tc.tool_name.clone(),
                    args: tc.arguments.clone(),
                })
                .await
                .ok();
            events
                .send(StepEvent::ToolResult {
                    step,
                    tool_name: tc.tool_name.clone(),
                    result: outcome.value.clone(),
                    success,
                    duration_ms,
                })
                .await
                .ok();

            if outcome.invoked {
                let entry = session
                    .context
                    .tool_usage
                    .entry(tc.tool_name.clone())
                    .or_default();
                entry.calls += 1;
                entry.last_call_at = Some(now_ms());
                if let Some(sources) = outcome.value.get("sources").and_then(|v| v.as_array()) {
                    for s in sources {
                        if let Some(s) = s.as_str() {
                            session.context.sources.push(s.to_string());
                        }
                    }
                }
            }

            let message = SessionMessage {
                session_id: session.id.clone(),
                seq: 0,
                role: MessageRole::Tool,
                content: serde_json::to_string(&outcome.value).unwrap_or_default(),
                tool_calls: Vec::new(),
                tool_call_id: Some(tc.id.clone()),
                message_type: MessageType::ToolResult,
                step: Some(step),
                step_data: None,
            };
            let execution = ToolExecution {
                session_id: session.id.clone(),
                tool_name: tc.tool_name.clone(),
                arguments: tc.arguments.clone(),
                result: outcome.value.clone(),
                status: outcome.status,
                started_at: now,
                finished_at,
            };
            let context_snapshot = session.context.clone();
            self.store_call(|| {
                self.store.record_tool_execution(
                    &session.id,
                    &message,
                    &execution,
                    &context_snapshot,
                )
            })
            .await?;

            if tc.tool_name.eq_ignore_ascii_case("FinalAnswerTool") && success {
                let answer = outcome
                    .value
                    .get("answer")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let status = outcome
                    .value
                    .get("status")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("completed");
                let final_state = if status == "completed" {
                    SessionState::Completed
                } else {
                    SessionState::Failed
                };
                session.context.execution_result = Some(answer);
                let run_outcome = self
                    .finalize(
                        session,
                        final_state,
                        "final_answer",
                        "stop",
                        step_started_at,
                        events,
                    )
                    .await?;
                return Ok(Some(run_outcome));
            }
        }
        Ok(None)
    }

    /// Transitions the session to `final_state`, persists it, and emits the
    /// terminal `step_end`/`message`/`done` sequence (§4.8 "termination").
    async fn finalize(
        &self,
        session: &mut Session,
        final_state: SessionState,
        reason: &str,
        finish_reason: &str,
        step_started_at: i64,
        events: &mpsc::Sender<StepEvent>,
    ) -> Result<RunOutcome, DriverError> {
        if session.context.execution_result.is_none() {
            session.context.execution_result = Some(format!("failed: {reason}"));
        }
        let from_state = session.state;
        self.store_call(|| {
            self.store
                .update_session_state(&session.id, from_state, final_state, &session.context)
        })
        .await?;
        session.state = final_state;

        events
            .send(StepEvent::StepEnd {
                step: session.context.iteration,
                status: if final_state == SessionState::Completed {
                    StepEndStatus::Completed
                } else {
                    StepEndStatus::Error
                },
                duration_ms: (now_ms() - step_started_at).max(0) as u64,
            })
            .await
            .ok();
        events
            .send(StepEvent::Message {
                content: session.context.execution_result.clone().unwrap_or_default(),
            })
            .await
            .ok();
        events
            .send(StepEvent::Done {
                finish_reason: finish_reason.to_string(),
            })
            .await
            .ok();

        Ok(RunOutcome::Finished(session.clone()))
    }

    async fn finalize_with_answer(
        &self,
        session: &mut Session,
        answer: String,
        finish_reason: &str,
        step_started_at: i64,
        events: &mpsc::Sender<StepEvent>,
    ) -> Result<RunOutcome, DriverError> {
        session.context.execution_result = Some(answer);
        self.finalize(
            session,
            SessionState::Failed,
            "llm_invariant",
            finish_reason,
            step_started_at,
            events,
        )
        .await
    }

    /// Wraps a store write in the §4.1/§7 `TransientStore` retry schedule.
    async fn store_call<T, F, Fut>(&self, op: F) -> Result<T, DriverError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        retry_with_backoff(STORE_BACKOFF, |e: &StoreError| matches!(e, StoreError::Transient(_)), op)
            .await
            .map_err(DriverError::from)
    }
}

fn reasoning_tool_record() -> ToolRecord {
    ToolRecord {
        id: "reasoning-tool".into(),
        name: "ReasoningTool".into(),
        description: "Record the rationale for the next step before selecting a tool.".into(),
        entrypoint: "builtin".into(),
        config: serde_json::json!({}),
        embedding: None,
        category: crate::domain::ToolCategory::Utility,
        active: true,
    }
}

fn build_llm_messages(rendered_system: &str, history: &[SessionMessage]) -> Vec<LlmMessage> {
    let mut out = Vec::with_capacity(history.len() + 1);
    out.push(LlmMessage::system(rendered_system));
    for m in history {
        out.push(LlmMessage {
            role: match m.role {
                MessageRole::System => LlmRole::System,
                MessageRole::User => LlmRole::User,
                MessageRole::Assistant => LlmRole::Assistant,
                MessageRole::Tool => LlmRole::Tool,
            },
            content: m.content.clone(),
            tool_calls: m.tool_calls.clone(),
            tool_call_id: m.tool_call_id.clone(),
        });
    }
    out
}

/// Per-call LLM timeout: remaining session time budget, floored at 30s
/// (§5 "LLM call timeout").
fn remaining_call_timeout(context: &ContextSnapshot, time_budget_seconds: u64) -> std::time::Duration {
    let elapsed_ms = now_ms() - context.started_at.unwrap_or_else(now_ms);
    let budget_ms = (time_budget_seconds as i64) * 1000;
    let remaining_ms = (budget_ms - elapsed_ms).max(30_000);
    std::time::Duration::from_millis(remaining_ms as u64)
}
