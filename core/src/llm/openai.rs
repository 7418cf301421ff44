//! OpenAI-compatible [`LlmClient`] backed by `async-openai` (§1, §6): the
//! core speaks the provider's streaming chat-completions API and nothing
//! provider-specific beyond base URL + API key.

use std::collections::BTreeMap;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolChoiceOption, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::{ChatOptions, LlmClient, LlmMessage, LlmRole, LlmTurn, LlmUsage, ToolChoice};
use crate::domain::ToolCallRequest;
use crate::error::LlmError;

/// One provider per (base_url, api_key, model) the driver is configured
/// with — a template version's `LlmPolicy` (§3) maps directly onto these
/// three fields plus per-call temperature/max_tokens already on [`ChatOptions`].
pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
    model: String,
}

impl ChatOpenAI {
    pub fn new(api_key: &str, base_url: Option<&str>, model: &str) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = base_url {
            config = config.with_api_base(base);
        }
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    fn to_request_message(
        msg: &LlmMessage,
    ) -> Result<ChatCompletionRequestMessage, LlmError> {
        let err = |e: String| LlmError::Invariant(e);
        Ok(match msg.role {
            LlmRole::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(msg.content.clone())
                .build()
                .map_err(|e| err(e.to_string()))?
                .into(),
            LlmRole::User => ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.clone())
                .build()
                .map_err(|e| err(e.to_string()))?
                .into(),
            LlmRole::Assistant => {
                let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                builder.content(msg.content.clone());
                if !msg.tool_calls.is_empty() {
                    let tool_calls = msg
                        .tool_calls
                        .iter()
                        .map(|tc| ChatCompletionMessageToolCall {
                            id: tc.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: tc.tool_name.clone(),
                                arguments: tc.arguments.to_string(),
                            },
                        })
                        .collect::<Vec<_>>();
                    builder.tool_calls(tool_calls);
                }
                builder.build().map_err(|e| err(e.to_string()))?.into()
            }
            LlmRole::Tool => ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id(msg.tool_call_id.clone().unwrap_or_default())
                .content(msg.content.clone())
                .build()
                .map_err(|e| err(e.to_string()))?
                .into(),
        })
    }

    fn to_tool_choice(choice: &ToolChoice) -> Option<ChatCompletionToolChoiceOption> {
        match choice {
            ToolChoice::Auto => Some(ChatCompletionToolChoiceOption::Auto),
            ToolChoice::None => Some(ChatCompletionToolChoiceOption::None),
            ToolChoice::Required => Some(ChatCompletionToolChoiceOption::Required),
            ToolChoice::Forced(name) => {
                Some(ChatCompletionToolChoiceOption::Named(
                    async_openai::types::ChatCompletionNamedToolChoice {
                        r#type: ChatCompletionToolType::Function,
                        function: async_openai::types::FunctionName { name: name.clone() },
                    },
                ))
            }
        }
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn chat(
        &self,
        messages: &[LlmMessage],
        options: &ChatOptions,
        delta_tx: Option<mpsc::Sender<String>>,
    ) -> Result<LlmTurn, LlmError> {
        let request_messages = messages
            .iter()
            .map(Self::to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        let tools = options
            .tools
            .iter()
            .map(|t| {
                Ok(ChatCompletionTool {
                    r#type: ChatCompletionToolType::Function,
                    function: FunctionObjectArgs::default()
                        .name(t.name.clone())
                        .description(t.description.clone())
                        .parameters(t.parameters.clone())
                        .build()
                        .map_err(|e| LlmError::Invariant(e.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>, LlmError>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(self.model.clone())
            .messages(request_messages)
            .temperature(options.temperature)
            .max_tokens(options.max_tokens)
            .parallel_tool_calls(options.parallel_tool_calls);
        if !tools.is_empty() {
            builder.tools(tools);
            if let Some(tc) = Self::to_tool_choice(&options.tool_choice) {
                builder.tool_choice(tc);
            }
        }
        let request = builder
            .build()
            .map_err(|e| LlmError::Invariant(e.to_string()))?;

        let call = async {
            if delta_tx.is_some() {
                self.chat_streaming(request, delta_tx).await
            } else {
                self.chat_once(request).await
            }
        };

        tokio::time::timeout(options.timeout, call)
            .await
            .map_err(|_| LlmError::Timeout(options.timeout.as_secs()))?
    }
}

/// Accumulates a streamed tool call by its index in `delta.tool_calls`
/// (OpenAI emits name/arguments as incremental fragments keyed by index,
/// not by id, across chunks).
#[derive(Default)]
struct ToolCallAccum {
    id: String,
    name: String,
    arguments: String,
}

impl ChatOpenAI {
    async fn chat_once(
        &self,
        request: async_openai::types::CreateChatCompletionRequest,
    ) -> Result<LlmTurn, LlmError> {
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Invariant("empty choices".into()))?;
        let content = choice.message.content.unwrap_or_default();
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| parse_tool_call(tc.id, tc.function.name, tc.function.arguments))
            .collect::<Result<Vec<_>, _>>()?;
        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        Ok(LlmTurn {
            content,
            tool_calls,
            usage,
        })
    }

    async fn chat_streaming(
        &self,
        request: async_openai::types::CreateChatCompletionRequest,
        delta_tx: Option<mpsc::Sender<String>>,
    ) -> Result<LlmTurn, LlmError> {
        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;

        let mut content = String::new();
        let mut tool_calls: BTreeMap<u32, ToolCallAccum> = BTreeMap::new();
        let mut usage = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Transient(e.to_string()))?;
            if let Some(u) = chunk.usage {
                usage = Some(LlmUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                });
            }
            let Some(choice) = chunk.choices.into_iter().next() else {
                continue;
            };
            if let Some(delta) = choice.delta.content {
                content.push_str(&delta);
                if let Some(tx) = &delta_tx {
                    let _ = tx.send(delta).await;
                }
            }
            if let Some(deltas) = choice.delta.tool_calls {
                for d in deltas {
                    let entry = tool_calls.entry(d.index).or_default();
                    if let Some(id) = d.id {
                        entry.id = id;
                    }
                    if let Some(f) = d.function {
                        if let Some(name) = f.name {
                            entry.name.push_str(&name);
                        }
                        if let Some(args) = f.arguments {
                            entry.arguments.push_str(&args);
                        }
                    }
                }
            }
        }

        let tool_calls = tool_calls
            .into_values()
            .map(|acc| parse_tool_call(acc.id, acc.name, acc.arguments))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LlmTurn {
            content,
            tool_calls,
            usage,
        })
    }
}

fn parse_tool_call(
    id: String,
    tool_name: String,
    arguments: String,
) -> Result<ToolCallRequest, LlmError> {
    let arguments = if arguments.trim().is_empty() {
        serde_json::Value::Object(Default::default())
    } else {
        serde_json::from_str(&arguments).map_err(|e| {
            LlmError::Invariant(format!("malformed tool_call arguments for {tool_name}: {e}"))
        })?
    };
    Ok(ToolCallRequest {
        id,
        tool_name,
        arguments,
    })
}
