//! Conversation event system.
//!
//! Provides a callback-based observability layer for
//! [`ConversationRuntime`](crate::engine::conversation::ConversationRuntime). Implement
//! [`ConversationEventHandler`] to receive notifications as a conversation progresses
//! through its turn loop — round boundaries, tool dispatch decisions, and completion.
//!
//! # Architecture
//!
//! [`ConversationEventHandler`] has one method per [`ConversationEvent`] variant, each
//! with a default no-op body, so a handler only overrides what it cares about. The
//! handler is wrapped in `Arc<dyn ConversationEventHandler>` and shared across rounds of
//! a single conversation.
//!
//! # Example
//!
//! ```rust
//! use analysis_engine::engine::event::{ConversationEvent, ConversationEventHandler};
//! use async_trait::async_trait;
//!
//! struct LoggingHandler;
//!
//! #[async_trait]
//! impl ConversationEventHandler for LoggingHandler {
//!     async fn on_event(&self, event: &ConversationEvent) {
//!         if let ConversationEvent::RoundLimitReached { rounds } = event {
//!             log::warn!("conversation hit its {rounds}-round limit");
//!         }
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::engine::message::TokenUsage;

/// Events emitted by a [`ConversationRuntime`](crate::engine::conversation::ConversationRuntime)
/// as it drives a conversation's turn loop.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// A new round began (the assistant was asked to produce another turn).
    TurnStarted {
        /// Zero-based round index within the conversation.
        round: u32,
    },
    /// A tool call was dispatched to a locally registered [`Tool`](crate::engine::tool::Tool).
    ToolCallDispatched {
        /// Name of the tool that was called.
        tool_name: String,
        /// Provider-assigned call id, for correlating with the eventual result message.
        call_id: String,
    },
    /// A tool call was withheld because its budget was already exhausted.
    ToolCallSkippedBudget {
        /// Name of the tool whose budget was exhausted.
        tool_name: String,
        /// Provider-assigned call id.
        call_id: String,
    },
    /// A tool call was left undispatched because the name isn't locally registered,
    /// i.e. it is serviced by the LLM platform itself.
    ToolCallSkippedHosted {
        /// Name of the hosted tool.
        tool_name: String,
        /// Provider-assigned call id.
        call_id: String,
    },
    /// The conversation reached [`ConversationOptions::max_rounds`](crate::engine::conversation::ConversationOptions::max_rounds)
    /// without the assistant producing a final, tool-call-free turn.
    RoundLimitReached {
        /// The configured round limit that was hit.
        rounds: u32,
    },
    /// The conversation finished, successfully or by hitting its round limit.
    ConversationCompleted {
        /// Total rounds actually run.
        rounds: u32,
        /// Cumulative token usage across every round.
        usage: TokenUsage,
    },
}

/// Receives [`ConversationEvent`]s from a running conversation.
///
/// All methods default to a no-op; override only the ones you need.
#[async_trait]
pub trait ConversationEventHandler: Send + Sync {
    /// Dispatch a single event. The default implementation does nothing.
    async fn on_event(&self, event: &ConversationEvent) {
        let _ = event;
    }
}

/// A handler that ignores every event, used as the default when no handler is supplied.
pub struct NullEventHandler;

#[async_trait]
impl ConversationEventHandler for NullEventHandler {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        count: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ConversationEventHandler for CountingHandler {
        async fn on_event(&self, _event: &ConversationEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn handler_receives_dispatched_events() {
        let count = Arc::new(AtomicU32::new(0));
        let handler = CountingHandler { count: count.clone() };
        handler.on_event(&ConversationEvent::TurnStarted { round: 0 }).await;
        handler
            .on_event(&ConversationEvent::RoundLimitReached { rounds: 6 })
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn null_handler_is_inert() {
        let handler = NullEventHandler;
        handler.on_event(&ConversationEvent::TurnStarted { round: 0 }).await;
    }
}
