//! OpenAI-compatible chat completion request DTOs (runtime spec §6).
//!
//! Message `content` can be a string or an array of parts (multimodal); both
//! are accepted so that ordinary OpenAI clients round-trip unchanged.

use serde::Deserialize;

/// Chat completion request body (OpenAI-compatible).
///
/// `model` carries either a known template name (start a new session) or an
/// existing session id (resume a clarification), per the Gateway Adapter's
/// routing rule (runtime spec §4.9).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
    /// Correlates a clarification reply with the session it answers, when
    /// `model` alone is ambiguous (runtime spec §4.9).
    #[serde(default)]
    pub chat_id: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<MessageContent>,
}

/// Message content: either a plain string or an array of parts (OpenAI multimodal).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    String(String),
    Array(Vec<ContentPart>),
}

impl MessageContent {
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::String(s) => s.clone(),
            MessageContent::Array(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct StreamOptions {
    #[serde(default)]
    pub include_usage: bool,
}

/// Extracts the last user message from a request — this becomes the task
/// text (new session) or the clarification answer (resumed session).
pub fn last_user_message(req: &ChatCompletionRequest) -> Option<String> {
    req.messages
        .iter()
        .rev()
        .find(|m| m.role.eq_ignore_ascii_case("user"))
        .and_then(|m| m.content.as_ref().map(|c| c.as_text()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_user_message_picks_most_recent_user_turn() {
        let req = ChatCompletionRequest {
            messages: vec![
                ChatMessage {
                    role: "user".into(),
                    content: Some(MessageContent::String("first".into())),
                },
                ChatMessage {
                    role: "assistant".into(),
                    content: Some(MessageContent::String("reply".into())),
                },
                ChatMessage {
                    role: "user".into(),
                    content: Some(MessageContent::String("second".into())),
                },
            ],
            model: "sgr-research-agent".into(),
            stream: true,
            stream_options: None,
            chat_id: None,
        };
        assert_eq!(last_user_message(&req).as_deref(), Some("second"));
    }

    #[test]
    fn message_content_array_concatenates_text_parts() {
        let mc = MessageContent::Array(vec![
            ContentPart {
                part_type: Some("text".into()),
                text: Some("hello ".into()),
            },
            ContentPart {
                part_type: Some("image_url".into()),
                text: None,
            },
            ContentPart {
                part_type: Some("text".into()),
                text: Some("world".into()),
            },
        ]);
        assert_eq!(mc.as_text(), "hello world");
    }
}
