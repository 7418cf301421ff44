//! Wire protocol for the agent runtime: step events, SSE framing, and the
//! OpenAI-compatible request/response DTOs the Gateway Adapter speaks.
//!
//! This crate has no async-runtime dependency and no knowledge of sessions,
//! stores, or tools — it only knows how to shape bytes on the wire.

pub mod envelope;
pub mod event;
pub mod request;
pub mod response;
pub mod sse;

pub use envelope::session_comment_line;
pub use event::{StepEndStatus, StepEvent, StepStartStatus};
pub use request::{ChatCompletionRequest, ChatMessage, MessageContent, StreamOptions};
pub use response::{ChatCompletion, ModelList, ModelListEntry};
pub use sse::{ChunkMeta, SseEncoder};
