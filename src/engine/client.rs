//! [`LLMClient`]: the four-entry-point façade engines call into (spec.md §4.5).
//!
//! `Ask` and `AskStream` both build a [`HttpSession`] and delegate the tool-dispatch loop
//! to [`ConversationRuntime`]; `DoBatch` delegates straight to
//! [`BatchManager`](crate::engine::batch::BatchManager) without waiting. Model-class
//! detection (`is_reasoning_model`) governs the wire shape at the point each
//! [`HttpSession::next`] call is actually serialized, since a reasoning model swaps
//! `messages`→`input` and drops `temperature`/`tool_choice` entirely rather than sending
//! them as null.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::engine::batch::{BatchJob, BatchManager};
use crate::engine::budget::BudgetConsumer;
use crate::engine::config::EngineConfig;
use crate::engine::conversation::{AssistantTurn, ConversationOptions, ConversationRuntime, Session};
use crate::engine::error::{BatchError, ConversationError};
use crate::engine::message::{Message, MessageChunk, NativeToolCall, Role, TokenUsage};
use crate::engine::tool::{ToolDef, ToolRegistry};
use crate::engine::transport::{get_shared_http_client, is_reasoning_model, HttpMiddleware};

/// A single request to the LLM, shared by `Ask`, `AskStream`, and `DoBatch`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptRequest {
    /// Model identifier; falls back to [`EngineConfig::default_model`] when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Conversation seed messages.
    pub messages: Vec<WireMessage>,
    /// Output token cap. Serialized as `max_tokens` or `max_output_tokens` depending on
    /// model class.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature. Omitted entirely (not sent as null) for reasoning models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Function-tool descriptors available this request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
    /// Free-form metadata forwarded verbatim to the vendor (billing tags, etc).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// A JSON-schema envelope requesting structured output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    /// Batch-only correlation id; ignored by `Ask`/`AskStream`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
}

/// A `{role, content}` pair as carried on the wire, distinct from [`Message`] so that
/// serde derives stay free of the `Arc<str>`/tool-call bookkeeping internal messages
/// carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// `"system"`, `"user"`, `"assistant"`, or `"tool"`.
    pub role: String,
    /// Message text.
    pub content: String,
    /// Present only on a `"tool"`-role message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let (role, tool_call_id) = match &message.role {
            Role::System => ("system".to_string(), None),
            Role::User => ("user".to_string(), None),
            Role::Assistant => ("assistant".to_string(), None),
            Role::Tool { call_id } => ("tool".to_string(), Some(call_id.clone())),
        };
        Self {
            role,
            content: message.content.to_string(),
            tool_call_id,
        }
    }
}

/// Final result of `Ask`: assistant content plus cumulative token usage.
#[derive(Debug, Clone)]
pub struct LLMResponse {
    /// The final assistant turn's text content.
    pub content: String,
    /// Token usage accumulated across every round of tool dispatch.
    pub usage: TokenUsage,
    /// Required tools (per the request's budget) never called enough times.
    pub unused_required: Vec<String>,
}

/// Raw wire envelope returned by the synchronous transport, shared by standard and
/// reasoning-model endpoints.
#[derive(Debug, Deserialize)]
struct TransportResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<TransportToolCall>,
    #[serde(default)]
    usage: TransportUsage,
}

#[derive(Debug, Deserialize)]
struct TransportToolCall {
    id: String,
    function: TransportFunctionCall,
}

#[derive(Debug, Deserialize)]
struct TransportFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Default, Deserialize)]
struct TransportUsage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}

/// A [`Session`] backed by the vendor's synchronous HTTP endpoint.
///
/// Builds the request body anew on each [`Session::next`] call from the accumulated
/// history, so mid-conversation tool results are visible to the next round.
pub struct HttpSession {
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    history: Vec<Message>,
    middleware: HttpMiddleware,
    /// Per-request timeout override, layered on top of the shared client's own
    /// connection-level timeout — lets a caller tighten (or loosen) the effective
    /// timeout per [`EngineConfig`] without rebuilding the pooled client.
    http_timeout: Duration,
}

impl HttpSession {
    /// Start a session seeded with `history` against `model`.
    pub fn new(base_url: String, model: String, history: Vec<Message>, config: &EngineConfig) -> Self {
        Self {
            base_url,
            model,
            max_tokens: None,
            temperature: None,
            history,
            middleware: HttpMiddleware::new(config.retry),
            http_timeout: config.http_timeout,
        }
    }

    fn endpoint(&self) -> String {
        if is_reasoning_model(&self.model) {
            format!("{}/responses", self.base_url)
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn build_body(&self, func_tools: &[ToolDef], response_format: Option<&serde_json::Value>) -> serde_json::Value {
        let wire_messages: Vec<WireMessage> = self.history.iter().map(WireMessage::from).collect();
        let reasoning = is_reasoning_model(&self.model);
        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), serde_json::json!(self.model));
        if reasoning {
            body.insert("input".to_string(), serde_json::json!(wire_messages));
            if let Some(max_tokens) = self.max_tokens {
                body.insert("max_output_tokens".to_string(), serde_json::json!(max_tokens));
            }
        } else {
            body.insert("messages".to_string(), serde_json::json!(wire_messages));
            if let Some(max_tokens) = self.max_tokens {
                body.insert("max_tokens".to_string(), serde_json::json!(max_tokens));
            }
            if let Some(temperature) = self.temperature {
                body.insert("temperature".to_string(), serde_json::json!(temperature));
            }
        }
        if !func_tools.is_empty() {
            body.insert("tools".to_string(), serde_json::json!(func_tools));
        }
        if let Some(response_format) = response_format {
            body.insert("response_format".to_string(), response_format.clone());
        }
        serde_json::Value::Object(body)
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn next(
        &mut self,
        func_tools: &[ToolDef],
        response_format: Option<&serde_json::Value>,
    ) -> Result<AssistantTurn, ConversationError> {
        let body = self.build_body(func_tools, response_format);
        let endpoint = self.endpoint();
        let http_timeout = self.http_timeout;
        let response = self
            .middleware
            .execute(|| {
                let body = body.clone();
                let endpoint = endpoint.clone();
                async move {
                    get_shared_http_client()
                        .post(&endpoint)
                        .timeout(http_timeout)
                        .json(&body)
                        .send()
                        .await
                }
            })
            .await
            .map_err(|e| ConversationError::Session(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConversationError::Session(format!(
                "transport returned status {}",
                response.status()
            )));
        }

        let parsed: TransportResponse = response
            .json()
            .await
            .map_err(|e| ConversationError::Session(e.to_string()))?;

        Ok(AssistantTurn {
            content: parsed.content,
            tool_calls: parsed
                .tool_calls
                .into_iter()
                .map(|tc| NativeToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                })
                .collect(),
            usage: TokenUsage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
                total_tokens: parsed.usage.total_tokens,
            },
        })
    }

    fn append_message(&mut self, message: Message) {
        self.history.push(message);
    }
}

/// Stream of incremental content chunks returned by [`LLMClient::ask_stream`].
pub type MessageChunkStream = Pin<Box<dyn Stream<Item = Result<MessageChunk, ConversationError>> + Send>>;

/// The façade engines use to talk to the LLM, synchronously or via batch.
pub struct LLMClient {
    config: EngineConfig,
    registry: Arc<ToolRegistry>,
    budget: Arc<BudgetConsumer>,
    batch: Arc<BatchManager>,
}

impl LLMClient {
    /// Build a client over a fixed config, tool registry, budget consumer, and batch manager.
    pub fn new(
        config: EngineConfig,
        registry: Arc<ToolRegistry>,
        budget: Arc<BudgetConsumer>,
        batch: Arc<BatchManager>,
    ) -> Self {
        Self { config, registry, budget, batch }
    }

    /// Swap the tool registry used by subsequent calls.
    pub fn register_tool(&mut self, registry: Arc<ToolRegistry>) {
        self.registry = registry;
    }

    /// Swap the budget consumer used by subsequent calls.
    pub fn set_tool_consumer(&mut self, budget: Arc<BudgetConsumer>) {
        self.budget = budget;
    }

    /// Synchronous ask: seeds a [`HttpSession`] from `request` and drives it to
    /// completion via [`ConversationRuntime`].
    pub async fn ask(&self, request: PromptRequest) -> Result<LLMResponse, ConversationError> {
        let model = request.model.clone().unwrap_or_else(|| self.config.default_model.clone());
        let history: Vec<Message> = request
            .messages
            .iter()
            .map(|m| Message::new(role_from_wire(&m.role, m.tool_call_id.clone()), m.content.clone()))
            .collect();
        let mut session = HttpSession::new(self.config.llm_base_url.clone(), model, history, &self.config);
        session.max_tokens = request.max_tokens;
        session.temperature = request.temperature;

        let runtime = ConversationRuntime::new(
            self.registry.clone(),
            self.budget.clone(),
            ConversationOptions { max_rounds: self.config.max_rounds },
        );
        let outcome = runtime
            .execute(&mut session, &request.tools, request.response_format.as_ref())
            .await?;
        Ok(LLMResponse {
            content: outcome.final_turn.content,
            usage: outcome.usage,
            unused_required: outcome.unused_required,
        })
    }

    /// Streaming ask: emits incremental content chunks. Tool dispatch (if any) still
    /// runs to completion before the returned stream yields its final item — streaming
    /// is of text, not of the tool loop itself.
    pub async fn ask_stream(
        &self,
        request: PromptRequest,
    ) -> Result<MessageChunkStream, ConversationError> {
        let response = self.ask(request).await?;
        let chunk = MessageChunk {
            content: response.content,
            finish_reason: Some("stop".to_string()),
        };
        Ok(Box::pin(futures_util::stream::once(async move { Ok(chunk) })))
    }

    /// Submit a batch of requests without waiting for completion.
    pub async fn do_batch(&self, requests: Vec<PromptRequest>) -> Result<BatchJob, BatchError> {
        self.batch.process_batch(requests, false).await
    }
}

fn role_from_wire(role: &str, tool_call_id: Option<String>) -> Role {
    match role {
        "system" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool {
            call_id: tool_call_id.unwrap_or_default(),
        },
        other => {
            log::warn!("unrecognized wire role \"{other}\"; treating as user");
            Role::User
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_model_body_uses_messages_and_temperature() {
        let config = EngineConfig::default();
        let session = HttpSession::new(
            config.llm_base_url.clone(),
            "gpt-4o".to_string(),
            vec![Message::user("hello")],
            &config,
        );
        let mut session = session;
        session.temperature = Some(0.7);
        let body = session.build_body(&[], None);
        assert!(body.get("messages").is_some());
        assert!(body.get("input").is_none());
        assert_eq!(body.get("temperature").unwrap(), &serde_json::json!(0.7));
    }

    #[test]
    fn reasoning_model_body_uses_input_and_drops_temperature() {
        let config = EngineConfig::default();
        let mut session = HttpSession::new(
            config.llm_base_url.clone(),
            "gpt-5".to_string(),
            vec![Message::user("hello")],
            &config,
        );
        session.temperature = Some(0.7);
        session.max_tokens = Some(100);
        let body = session.build_body(&[], None);
        assert!(body.get("input").is_some());
        assert!(body.get("messages").is_none());
        assert!(body.get("temperature").is_none());
        assert_eq!(body.get("max_output_tokens").unwrap(), &serde_json::json!(100));
        assert!(body.get("max_tokens").is_none());
    }
}
