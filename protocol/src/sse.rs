//! Bit-exact OpenAI-compatible SSE encoding of [`StepEvent`]s (runtime spec §6).
//!
//! Frame shape per event: `event: <kind>\ndata: <json>\n\n`. A leading
//! `: session_id=<uuid>` comment precedes the first frame; the stream ends
//! with a synthetic `data: [DONE]` line. `message` events are wrapped into
//! an OpenAI chat-completion-chunk shape (`{id, object, choices:[...]}`)
//! rather than emitted as their bare payload, since clients read the
//! streaming text through that envelope.

use serde::Serialize;
use serde_json::json;

use crate::envelope::session_comment_line;
use crate::event::StepEvent;

/// Metadata shared by every chunk on one session's stream.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub session_id: String,
    pub model: String,
}

/// Stateful encoder: feed [`StepEvent`]s, call [`finish`](SseEncoder::finish),
/// then drain [`take_lines`](SseEncoder::take_lines).
pub struct SseEncoder {
    meta: ChunkMeta,
    lines: Vec<String>,
    sent_session_comment: bool,
}

impl SseEncoder {
    pub fn new(meta: ChunkMeta) -> Self {
        Self {
            meta,
            lines: Vec::new(),
            sent_session_comment: false,
        }
    }

    fn ensure_session_comment(&mut self) {
        if !self.sent_session_comment {
            self.lines.push(session_comment_line(&self.meta.session_id));
            self.sent_session_comment = true;
        }
    }

    /// Feeds one driver event, appending the SSE frame(s) it produces.
    pub fn feed(&mut self, event: &StepEvent) {
        self.ensure_session_comment();
        let data = match event {
            StepEvent::Message { content } => json!({
                "id": self.meta.session_id,
                "object": "chat.completion.chunk",
                "choices": [{"delta": {"content": content}}],
            }),
            other => other.data_value(),
        };
        self.lines.push(frame_line(event.kind(), &data));
    }

    /// Appends the terminal `data: [DONE]` line. Call exactly once, after the
    /// `done` event has already been fed.
    pub fn finish(&mut self) {
        self.lines.push("data: [DONE]\n\n".to_string());
    }

    /// Returns and clears the collected SSE lines.
    pub fn take_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }
}

fn frame_line<T: Serialize>(kind: &str, data: &T) -> String {
    let json = serde_json::to_string(data).expect("event payload serialization is infallible");
    format!("event: {kind}\ndata: {json}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{StepEndStatus, StepStartStatus};

    #[test]
    fn feed_emits_session_comment_once_then_named_frames() {
        let mut enc = SseEncoder::new(ChunkMeta {
            session_id: "sess-1".into(),
            model: "sgr-research-agent".into(),
        });
        enc.feed(&StepEvent::StepStart {
            step: 1,
            max_steps: 10,
            description: "start".into(),
            status: StepStartStatus::Running,
        });
        enc.feed(&StepEvent::Message {
            content: "hi".into(),
        });
        enc.feed(&StepEvent::Done {
            finish_reason: "stop".into(),
        });
        enc.finish();
        let lines = enc.take_lines();

        assert_eq!(lines[0], ": session_id=sess-1\n\n");
        assert!(lines[1].starts_with("event: step_start\ndata: "));
        assert!(lines[2].starts_with("event: message\ndata: "));
        assert!(lines[2].contains("\"object\":\"chat.completion.chunk\""));
        assert!(lines[3].starts_with("event: done\ndata: "));
        assert_eq!(lines[4], "data: [DONE]\n\n");
    }

    #[test]
    fn step_end_frame_carries_no_type_tag() {
        let mut enc = SseEncoder::new(ChunkMeta {
            session_id: "s".into(),
            model: "m".into(),
        });
        enc.feed(&StepEvent::StepEnd {
            step: 3,
            status: StepEndStatus::Completed,
            duration_ms: 42,
        });
        let lines = enc.take_lines();
        assert!(!lines[1].contains("\"type\""));
    }
}
