//! Non-streaming OpenAI-compatible response DTOs (runtime spec §4.9, §6).

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
}

impl ChatCompletion {
    pub const OBJECT: &'static str = "chat.completion";

    pub fn new(id: String, created: u64, model: String, content: String) -> Self {
        Self {
            id,
            object: Self::OBJECT,
            created,
            model,
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionMessage {
                    role: "assistant",
                    content,
                },
                finish_reason: "stop".to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ChatCompletionMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionMessage {
    pub role: &'static str,
    pub content: String,
}

/// `GET /v1/models` listing entry: one active template version (runtime spec §4.9).
#[derive(Debug, Clone, Serialize)]
pub struct ModelListEntry {
    pub id: String,
    pub object: &'static str,
    pub owned_by: String,
    pub version_id: String,
}

impl ModelListEntry {
    pub const OBJECT: &'static str = "model";
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub data: Vec<ModelListEntry>,
}
