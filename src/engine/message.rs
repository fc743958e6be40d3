//! Provider-agnostic chat primitives shared by [`Session`](crate::engine::conversation::Session)
//! and [`LLMClient`](crate::engine::client::LLMClient) implementations.
//!
//! Mirrors the shape of `cloudllm::client_wrapper`: messages carry an `Arc<str>` body so
//! conversation histories can be cheaply cloned, and an assistant message may carry zero
//! or more native tool calls when the provider's function-calling API selected a tool.

use std::sync::Arc;

/// The role associated with a [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    /// A system-authored message that primes or constrains assistant behavior.
    System,
    /// A user-authored message.
    User,
    /// An assistant-authored message (model output).
    Assistant,
    /// A tool-result message correlating with a prior [`NativeToolCall`] by id.
    Tool {
        /// The `NativeToolCall::id` this result answers.
        call_id: String,
    },
}

/// A single tool call requested by the LLM in a native function-calling response.
#[derive(Debug, Clone)]
pub struct NativeToolCall {
    /// Provider-assigned call id, correlated back via `Role::Tool { call_id }`.
    pub id: String,
    /// Tool name as it appeared in the `tools` array sent with the request.
    pub name: String,
    /// Raw JSON arguments exactly as returned by the provider (not yet parsed/validated).
    pub arguments: String,
}

/// A single chat message in a conversation history.
#[derive(Debug, Clone)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body. `Arc<str>` so histories can be cheaply cloned.
    pub content: Arc<str>,
    /// Native tool calls requested by the assistant. Empty for every role except an
    /// assistant message where the provider selected one or more tools.
    pub tool_calls: Vec<NativeToolCall>,
}

impl Message {
    /// Construct a plain message with no tool calls.
    pub fn new(role: Role, content: impl Into<Arc<str>>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Construct a system message.
    pub fn system(content: impl Into<Arc<str>>) -> Self {
        Self::new(Role::System, content)
    }

    /// Construct a user message.
    pub fn user(content: impl Into<Arc<str>>) -> Self {
        Self::new(Role::User, content)
    }

    /// Construct an assistant message carrying native tool calls.
    pub fn assistant_with_tool_calls(
        content: impl Into<Arc<str>>,
        tool_calls: Vec<NativeToolCall>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
        }
    }

    /// Construct a tool-result message answering `call_id`.
    pub fn tool_result(call_id: impl Into<String>, output: impl Into<Arc<str>>) -> Self {
        Self::new(Role::Tool { call_id: call_id.into() }, output)
    }
}

/// How many tokens were spent on input (prompt) vs. output (completion).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    /// Number of prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Number of generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Convenience total, normally `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Combine two usage readings, e.g. across tool-dispatch rounds.
    pub fn merged_with(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

/// A chunk of content in a streaming response ([`LLMClient::ask_stream`](crate::engine::client::LLMClient::ask_stream)).
#[derive(Debug, Clone)]
pub struct MessageChunk {
    /// Incremental content delta. May be empty for a chunk that only carries `finish_reason`.
    pub content: String,
    /// Provider-specific completion status (e.g. `"stop"`), present on the final chunk.
    pub finish_reason: Option<String>,
}
