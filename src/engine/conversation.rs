//! The tool-use conversation loop (spec.md §4.4).
//!
//! [`ConversationRuntime::execute`] drives a [`Session`] turn by turn: each round asks
//! the session for the next [`AssistantTurn`], dispatches any tool calls it carries
//! (locally executing registered tools, skipping hosted ones, and skipping
//! budget-exhausted ones with a synthetic assistant message), and terminates when a turn
//! arrives with no tool calls or when [`ConversationOptions::max_rounds`] is reached.
//!
//! Tool calls within a single turn are dispatched strictly in the order the assistant
//! emitted them — concurrent execution within one turn is an explicit non-goal, since
//! output ordering must stay reproducible for a later tool's arguments to be able to
//! depend on an earlier one's result.

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::budget::BudgetConsumer;
use crate::engine::error::ConversationError;
use crate::engine::event::{ConversationEvent, ConversationEventHandler, NullEventHandler};
use crate::engine::message::{Message, NativeToolCall, TokenUsage};
use crate::engine::tool::{ToolDef, ToolRegistry};

/// One assistant response within a conversation: its text content plus any tool calls
/// the provider emitted alongside it.
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    /// The assistant's text content for this turn. May be empty if the turn is purely a
    /// tool-call request.
    pub content: String,
    /// Tool calls requested by the assistant in this turn, in emission order.
    pub tool_calls: Vec<NativeToolCall>,
    /// Token usage for this single round, if the provider reported it.
    pub usage: TokenUsage,
}

/// A provider binding plus its evolving message history.
///
/// Implementations own the transport call (the HTTP round-trip to the vendor); the
/// conversation runtime only ever calls [`Session::next`] and
/// [`Session::append_message`].
#[async_trait]
pub trait Session: Send + Sync {
    /// Ask the provider for the next turn given the current history, the function-tool
    /// definitions available this conversation, and an optional structured-output
    /// schema.
    async fn next(
        &mut self,
        func_tools: &[ToolDef],
        response_format: Option<&serde_json::Value>,
    ) -> Result<AssistantTurn, ConversationError>;

    /// Append a message to the session's history (an assistant turn, a tool result, or
    /// a synthetic budget notice).
    fn append_message(&mut self, message: Message);
}

/// Bounds on [`ConversationRuntime::execute`].
#[derive(Debug, Clone, Copy)]
pub struct ConversationOptions {
    /// Maximum number of rounds before the runtime gives up and returns the last turn.
    /// `0` means the initial turn is returned without ever dispatching a tool call.
    pub max_rounds: u32,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self { max_rounds: 6 }
    }
}

/// Outcome of a completed (or round-limited) conversation.
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    /// The final assistant turn observed.
    pub final_turn: AssistantTurn,
    /// Number of rounds actually run.
    pub rounds: u32,
    /// Cumulative token usage across all rounds.
    pub usage: TokenUsage,
    /// `true` if the loop stopped because it hit `max_rounds` rather than a natural
    /// tool-call-free turn.
    pub hit_round_limit: bool,
    /// Required tools (per the budget consumer) that were never called enough times.
    /// The runtime does not retry on account of this list; it is surfaced for the
    /// caller to act on.
    pub unused_required: Vec<String>,
}

/// Drives a [`Session`] through the tool-use loop described in the module docs.
pub struct ConversationRuntime {
    registry: Arc<ToolRegistry>,
    budget: Arc<BudgetConsumer>,
    options: ConversationOptions,
    events: Arc<dyn ConversationEventHandler>,
}

impl ConversationRuntime {
    /// Build a runtime over the given tool registry and budget consumer.
    pub fn new(registry: Arc<ToolRegistry>, budget: Arc<BudgetConsumer>, options: ConversationOptions) -> Self {
        Self {
            registry,
            budget,
            options,
            events: Arc::new(NullEventHandler),
        }
    }

    /// Attach an event handler to observe round boundaries and dispatch decisions.
    pub fn with_event_handler(mut self, handler: Arc<dyn ConversationEventHandler>) -> Self {
        self.events = handler;
        self
    }

    /// Run the conversation to completion against `func_tools` (the wire definitions
    /// sent alongside each request) and an optional structured-output schema.
    pub async fn execute(
        &self,
        session: &mut dyn Session,
        func_tools: &[ToolDef],
        response_format: Option<&serde_json::Value>,
    ) -> Result<ConversationOutcome, ConversationError> {
        let mut usage = TokenUsage::default();
        let mut round: u32 = 0;

        if self.options.max_rounds == 0 {
            let turn = session.next(func_tools, response_format).await?;
            return Ok(ConversationOutcome {
                usage: turn.usage,
                final_turn: turn,
                rounds: 0,
                hit_round_limit: false,
                unused_required: self.budget.get_unused_required_tools(),
            });
        }

        loop {
            self.events
                .on_event(&ConversationEvent::TurnStarted { round })
                .await;

            let turn = session.next(func_tools, response_format).await?;
            usage = usage.merged_with(turn.usage);
            round += 1;

            if turn.tool_calls.is_empty() {
                self.events
                    .on_event(&ConversationEvent::ConversationCompleted { rounds: round, usage })
                    .await;
                return Ok(ConversationOutcome {
                    final_turn: turn,
                    rounds: round,
                    usage,
                    hit_round_limit: false,
                    unused_required: self.budget.get_unused_required_tools(),
                });
            }

            if round >= self.options.max_rounds {
                log::warn!(
                    "conversation hit its {}-round limit with {} pending tool call(s); returning last turn as-is",
                    self.options.max_rounds,
                    turn.tool_calls.len()
                );
                self.events
                    .on_event(&ConversationEvent::RoundLimitReached {
                        rounds: self.options.max_rounds,
                    })
                    .await;
                return Ok(ConversationOutcome {
                    final_turn: turn,
                    rounds: round,
                    usage,
                    hit_round_limit: true,
                    unused_required: self.budget.get_unused_required_tools(),
                });
            }

            session.append_message(Message::assistant_with_tool_calls(
                turn.content.clone(),
                turn.tool_calls.clone(),
            ));

            for call in &turn.tool_calls {
                self.dispatch_one(session, call).await?;
            }
        }
    }

    async fn dispatch_one(
        &self,
        session: &mut dyn Session,
        call: &NativeToolCall,
    ) -> Result<(), ConversationError> {
        let Some(tool) = self.registry.get(&call.name) else {
            self.events
                .on_event(&ConversationEvent::ToolCallSkippedHosted {
                    tool_name: call.name.clone(),
                    call_id: call.id.clone(),
                })
                .await;
            return Ok(());
        };

        if !self.budget.has_credits_for(&call.name) {
            self.events
                .on_event(&ConversationEvent::ToolCallSkippedBudget {
                    tool_name: call.name.clone(),
                    call_id: call.id.clone(),
                })
                .await;
            session.append_message(Message::tool_result(
                call.id.clone(),
                format!("Budget exhausted for tool {}.", call.name),
            ));
            return Ok(());
        }

        self.budget.consume_tools(&call.name).await?;
        self.events
            .on_event(&ConversationEvent::ToolCallDispatched {
                tool_name: call.name.clone(),
                call_id: call.id.clone(),
            })
            .await;

        let output = match tool.run((), &call.arguments).await {
            Ok(output) => output,
            Err(e) => {
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!("tool \"{}\" failed: {e}", call.name);
                }
                format!("Tool \"{}\" failed: {e}", call.name)
            }
        };
        session.append_message(Message::tool_result(call.id.clone(), output));
        Ok(())
    }
}
