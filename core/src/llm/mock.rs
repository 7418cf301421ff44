//! Canned-response LLM for driver/gateway tests — no network, deterministic.
//! A hand-rolled mock rather than a mocking-framework double, matching this
//! codebase's established test-tooling convention.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChatOptions, LlmClient, LlmMessage, LlmTurn};
use crate::error::LlmError;

/// Replays a fixed sequence of [`LlmTurn`]s, one per call, repeating the
/// last one once exhausted. Tests construct the sequence to match the
/// exact reason/select calls a scenario drives.
pub struct MockLlm {
    turns: Mutex<Vec<LlmTurn>>,
    cursor: Mutex<usize>,
}

impl MockLlm {
    pub fn new(turns: Vec<LlmTurn>) -> Self {
        Self {
            turns: Mutex::new(turns),
            cursor: Mutex::new(0),
        }
    }

    /// Single-turn convenience constructor: every call gets the same response.
    pub fn fixed(turn: LlmTurn) -> Self {
        Self::new(vec![turn])
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(
        &self,
        _messages: &[LlmMessage],
        _options: &ChatOptions,
        delta_tx: Option<mpsc::Sender<String>>,
    ) -> Result<LlmTurn, LlmError> {
        let turns = self.turns.lock().unwrap();
        let mut cursor = self.cursor.lock().unwrap();
        let idx = (*cursor).min(turns.len().saturating_sub(1));
        let turn = turns
            .get(idx)
            .cloned()
            .ok_or_else(|| LlmError::Invariant("MockLlm has no turns configured".into()))?;
        if *cursor < turns.len() {
            *cursor += 1;
        }
        if let Some(tx) = delta_tx {
            if !turn.content.is_empty() {
                let _ = tx.send(turn.content.clone()).await;
            }
        }
        Ok(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ToolCallRequest;

    #[tokio::test]
    async fn replays_turns_in_order_then_repeats_last() {
        let llm = MockLlm::new(vec![
            LlmTurn {
                content: "first".into(),
                tool_calls: vec![],
                usage: None,
            },
            LlmTurn {
                content: "second".into(),
                tool_calls: vec![ToolCallRequest {
                    id: "1-select-0".into(),
                    tool_name: "FinalAnswerTool".into(),
                    arguments: serde_json::json!({"answer": "4"}),
                }],
                usage: None,
            },
        ]);
        let opts = ChatOptions::default();
        let first = llm.chat(&[], &opts, None).await.unwrap();
        assert_eq!(first.content, "first");
        let second = llm.chat(&[], &opts, None).await.unwrap();
        assert_eq!(second.tool_calls.len(), 1);
        let third = llm.chat(&[], &opts, None).await.unwrap();
        assert_eq!(third.content, "second");
    }

    #[tokio::test]
    async fn streams_content_through_delta_channel() {
        let llm = MockLlm::fixed(LlmTurn {
            content: "streamed".into(),
            tool_calls: vec![],
            usage: None,
        });
        let (tx, mut rx) = mpsc::channel(4);
        let turn = llm.chat(&[], &ChatOptions::default(), Some(tx)).await.unwrap();
        assert_eq!(turn.content, "streamed");
        assert_eq!(rx.recv().await.as_deref(), Some("streamed"));
    }
}
