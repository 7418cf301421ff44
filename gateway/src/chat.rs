//! `POST /v1/chat/completions` (§4.9): the one endpoint that drives the
//! runtime. Routes to `StartSession` or `ResumeWithClarification`, then
//! either streams the Event Stream as SSE or accumulates it into a single
//! OpenAI `ChatCompletion` (§6).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream;
use tokio::sync::mpsc;

use agentd_core::{
    build_query, select_first_step_tools, ContextSnapshot, Session, SessionService,
    SelectionStrategy, SessionState, TemplateVersion,
};
use agentd_protocol::request::last_user_message;
use agentd_protocol::{ChatCompletion, ChatCompletionRequest, ChunkMeta, SseEncoder, StepEvent};

use crate::app::GatewayState;
use crate::error::ApiError;

/// §4.9 routing: resolve `model`/`chat_id` to either a freshly-created
/// session (new template run) or a resumed one (clarification reply).
async fn route(
    state: &GatewayState,
    req: &ChatCompletionRequest,
    task_text: &str,
) -> Result<(Session, TemplateVersion), ApiError> {
    if let Some(template) = state.store.get_template_by_name(&req.model).await? {
        let version_id = template.active_version_id.ok_or(ApiError::ModelNotFound)?;
        let template_version = state.store.get_template_version(&version_id).await?;
        let catalog_tools = state
            .store
            .list_tools(&template_version.tool_names)
            .await?;

        let query = build_query(task_text, &ContextSnapshot::default());
        let embedding = match (&state.embedder, template_version.settings.tool_policy.selection_strategy) {
            (Some(embedder), SelectionStrategy::Retrieval) => {
                Some(embedder.embed(&query).await?)
            }
            _ => None,
        };
        let first_step_tools = select_first_step_tools(
            &catalog_tools,
            &template_version,
            task_text,
            embedding.as_deref(),
        )?;

        let service = SessionService::new(state.store.clone());
        let title: String = task_text.chars().take(80).collect();
        let session = service
            .start_session(&template_version, &first_step_tools, task_text, &title)
            .await?;
        return Ok((session, template_version));
    }

    if let Ok((session, _)) = state.store.load_session(&req.model).await {
        let correlated = req.chat_id.as_deref() == Some(session.id.as_str());
        if session.state == SessionState::WaitingForClarification || correlated {
            let template_version = state
                .store
                .get_template_version(&session.template_version_id)
                .await?;
            let service = SessionService::new(state.store.clone());
            let resumed = service
                .resume_with_clarification(
                    &session.id,
                    task_text,
                    &template_version.settings.prompts.clarification,
                )
                .await?;
            return Ok((resumed, template_version));
        }
    }

    Err(ApiError::ModelNotFound)
}

pub async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    let task_text = last_user_message(&req).ok_or(ApiError::MissingUserMessage)?;
    let (session, template_version) = route(&state, &req, &task_text).await?;

    // Subscribed before the wakeup is sent so a direct-dispatch worker
    // cannot finish the session (and drop its events into the pool's
    // fallback sink) before this handler is listening. A worker picking the
    // session up on its own background poll tick first is still possible
    // and, per §4.2, tolerated: the run is not gated on anyone watching it.
    let rx = state.pool.events.subscribe(&session.id).await;
    state.pool.notify_new_session(&template_version.id).await;

    let model_name = req.model.clone();
    let session_id = session.id.clone();

    if req.stream {
        Ok(stream_response(session_id, model_name, rx))
    } else {
        Ok(accumulate_response(session_id, model_name, rx).await)
    }
}

fn stream_response(session_id: String, model: String, rx: mpsc::Receiver<StepEvent>) -> Response {
    let meta = ChunkMeta {
        session_id: session_id.clone(),
        model,
    };
    let encoder = SseEncoder::new(meta);
    let body_stream = stream::unfold((rx, encoder, false), |(mut rx, mut encoder, done)| async move {
        if done {
            return None;
        }
        match rx.recv().await {
            Some(event) => {
                let is_done = matches!(event, StepEvent::Done { .. });
                encoder.feed(&event);
                if is_done {
                    encoder.finish();
                }
                let chunk = encoder.take_lines().concat();
                Some((Ok::<_, std::io::Error>(chunk), (rx, encoder, is_done)))
            }
            None => {
                // Worker vanished without emitting `done` (crash mid-step);
                // the stream still must end with `[DONE]` (§8 "SSE
                // completeness").
                encoder.feed(&StepEvent::Error {
                    step: None,
                    message: "worker_fault".to_string(),
                });
                encoder.finish();
                let chunk = encoder.take_lines().concat();
                Some((Ok(chunk), (rx, encoder, true)))
            }
        }
    });

    let mut response = Response::new(Body::from_stream(body_stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(v) = HeaderValue::from_str(&session_id) {
        headers.insert("x-session-id", v);
    }
    response
}

async fn accumulate_response(
    session_id: String,
    model: String,
    mut rx: mpsc::Receiver<StepEvent>,
) -> Response {
    let mut content = String::new();
    let mut error_code: Option<String> = None;

    while let Some(event) = rx.recv().await {
        match event {
            StepEvent::Message { content: delta } => content.push_str(&delta),
            StepEvent::Error { message, .. } => error_code = Some(message),
            StepEvent::Done { .. } => break,
            _ => {}
        }
    }

    let created = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let body = ChatCompletion::new(session_id.clone(), created, model, content);

    let mut response = (StatusCode::OK, Json(body)).into_response();
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&session_id) {
        headers.insert("x-session-id", v);
    }
    if let Some(code) = error_code {
        if let Ok(v) = HeaderValue::from_str(&code) {
            headers.insert("x-session-error", v);
        }
    }
    response
}
