//! Per-conversation tool-call budgets (spec.md §4.3).
//!
//! [`ToolConstraints`] declares what a conversation is allowed and required to call;
//! [`BudgetConsumer`] enforces it at dispatch time. Counters are plain atomics rather
//! than a mutex-guarded map because the hot path (`has_credits_for`/`consume_tools`) is
//! called once per tool call per round and contention is never expected to be high
//! enough to justify anything heavier.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::engine::error::BudgetError;

/// Declares which tools a conversation may use and how many times.
///
/// `preferred` and `required` are both subsets of `tools` by construction — see
/// [`ToolConstraints::validate`] — but are not validated eagerly on construction since
/// constraints are frequently built incrementally with a builder-style API.
#[derive(Debug, Clone, Default)]
pub struct ToolConstraints {
    /// Every tool name this conversation is permitted to call.
    pub tools: Vec<String>,
    /// Tool names the assistant should be nudged toward in prompting (advisory only;
    /// not enforced by [`BudgetConsumer`]).
    pub preferred: Vec<String>,
    /// Tool names that must be called at least once before the conversation is
    /// considered complete (see [`BudgetConsumer::has_unused_required_tools`]).
    pub required: Vec<String>,
    /// Per-tool minimum call count. Tools absent from this map have no minimum.
    pub min_calls_per_tool: HashMap<String, u32>,
    /// Per-tool maximum call count. Tools absent from this map are uncapped.
    pub max_calls_per_tool: HashMap<String, u32>,
}

impl ToolConstraints {
    /// Start building constraints over the given allowed tool set.
    pub fn new(tools: Vec<String>) -> Self {
        Self {
            tools,
            ..Default::default()
        }
    }

    /// Mark `name` as required, implicitly adding it to `tools` if absent.
    pub fn require(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.tools.contains(&name) {
            self.tools.push(name.clone());
        }
        self.required.push(name);
        self
    }

    /// Mark `name` as preferred, implicitly adding it to `tools` if absent.
    pub fn prefer(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.tools.contains(&name) {
            self.tools.push(name.clone());
        }
        self.preferred.push(name);
        self
    }

    /// Set a maximum call count for `name`.
    pub fn max_calls(mut self, name: impl Into<String>, max: u32) -> Self {
        self.max_calls_per_tool.insert(name.into(), max);
        self
    }

    /// Set a minimum call count for `name`.
    pub fn min_calls(mut self, name: impl Into<String>, min: u32) -> Self {
        self.min_calls_per_tool.insert(name.into(), min);
        self
    }

    /// Validate that `preferred`, `required`, and every key in the per-tool maps name a
    /// tool actually present in `tools`.
    pub fn validate(&self) -> Result<(), BudgetError> {
        for name in self.preferred.iter().chain(self.required.iter()) {
            if !self.tools.contains(name) {
                return Err(BudgetError::UnknownTool(name.clone()));
            }
        }
        for name in self.min_calls_per_tool.keys().chain(self.max_calls_per_tool.keys()) {
            if !self.tools.contains(name) {
                return Err(BudgetError::UnknownTool(name.clone()));
            }
        }
        Ok(())
    }
}

/// Tracks per-tool call counts for a single conversation and enforces
/// [`ToolConstraints`] at dispatch time.
///
/// Built once per conversation from a [`ToolConstraints`] and consumed turn by turn;
/// [`BudgetConsumer::reset`] exists for reusing the same constraints across conversations
/// without rebuilding the map.
pub struct BudgetConsumer {
    constraints: ToolConstraints,
    counts: HashMap<String, AtomicU32>,
}

impl BudgetConsumer {
    /// Build a fresh consumer from validated constraints.
    pub fn new(constraints: ToolConstraints) -> Result<Self, BudgetError> {
        constraints.validate()?;
        let counts = constraints
            .tools
            .iter()
            .map(|name| (name.clone(), AtomicU32::new(0)))
            .collect();
        Ok(Self { constraints, counts })
    }

    /// True if `name` is an allowed tool and has remaining credits under its max (or has
    /// no max, or a max of `0` — per spec.md §3, `0` means unlimited, not exhausted).
    pub fn has_credits_for(&self, name: &str) -> bool {
        let Some(count) = self.counts.get(name) else {
            return false;
        };
        match self.constraints.max_calls_per_tool.get(name) {
            Some(&max) if max > 0 => count.load(Ordering::SeqCst) < max,
            _ => true,
        }
    }

    /// Atomically record one call to `name`, failing if the budget is already exhausted.
    ///
    /// Callers must check [`has_credits_for`](Self::has_credits_for) (or accept the
    /// error here) before dispatching the underlying tool — this method does not itself
    /// run the tool, it only accounts for the call.
    pub async fn consume_tools(&self, name: &str) -> Result<(), BudgetError> {
        let Some(count) = self.counts.get(name) else {
            return Err(BudgetError::UnknownTool(name.to_string()));
        };
        // `Some(0)` means "no max" per spec.md §3, the same as `None` — only a
        // positive declared max actually bounds the count.
        let max = self.constraints.max_calls_per_tool.get(name).copied().filter(|&max| max > 0);
        loop {
            let current = count.load(Ordering::SeqCst);
            if let Some(max) = max {
                if current >= max {
                    return Err(BudgetError::Exhausted(name.to_string()));
                }
            }
            if count
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Remaining credits for `name`: `None` if the tool has no declared max, or a
    /// declared max of `0` (both mean unbounded per spec.md §3). `Some(0)` means
    /// exhausted under a positive max.
    pub fn get_remaining_credits(&self, name: &str) -> Option<u32> {
        let count = self.counts.get(name)?.load(Ordering::SeqCst);
        match self.constraints.max_calls_per_tool.get(name) {
            Some(&max) if max > 0 => Some(max.saturating_sub(count)),
            _ => None,
        }
    }

    /// Required tools that have not yet reached their per-tool minimum (or been called
    /// at all, when no explicit minimum is set — the implicit minimum for a required
    /// tool is 1).
    pub fn get_unused_required_tools(&self) -> Vec<String> {
        self.constraints
            .required
            .iter()
            .filter(|name| {
                let min = self.constraints.min_calls_per_tool.get(*name).copied().unwrap_or(1);
                let current = self.counts.get(*name).map(|c| c.load(Ordering::SeqCst)).unwrap_or(0);
                current < min
            })
            .cloned()
            .collect()
    }

    /// True if any required tool still falls short of its minimum.
    pub fn has_unused_required_tools(&self) -> bool {
        !self.get_unused_required_tools().is_empty()
    }

    /// Zero every counter, keeping the same constraints for reuse.
    pub fn reset(&self) {
        for count in self.counts.values() {
            count.store(0, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consume_respects_max_calls() {
        let constraints = ToolConstraints::new(vec!["get_quote".into()]).max_calls("get_quote", 2);
        let consumer = BudgetConsumer::new(constraints).unwrap();
        assert!(consumer.consume_tools("get_quote").await.is_ok());
        assert!(consumer.consume_tools("get_quote").await.is_ok());
        assert!(matches!(
            consumer.consume_tools("get_quote").await,
            Err(BudgetError::Exhausted(_))
        ));
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let consumer = BudgetConsumer::new(ToolConstraints::new(vec!["get_quote".into()])).unwrap();
        assert!(matches!(
            consumer.consume_tools("get_news").await,
            Err(BudgetError::UnknownTool(_))
        ));
        assert!(!consumer.has_credits_for("get_news"));
    }

    #[test]
    fn validate_rejects_required_tool_outside_tools() {
        let constraints = ToolConstraints {
            tools: vec!["get_quote".into()],
            required: vec!["get_news".into()],
            ..Default::default()
        };
        assert!(matches!(constraints.validate(), Err(BudgetError::UnknownTool(_))));
    }

    #[tokio::test]
    async fn required_tool_starts_unused_and_clears_after_call() {
        let constraints = ToolConstraints::new(vec!["get_quote".into()]).require("get_quote");
        let consumer = BudgetConsumer::new(constraints).unwrap();
        assert!(consumer.has_unused_required_tools());
        consumer.consume_tools("get_quote").await.unwrap();
        assert!(!consumer.has_unused_required_tools());
    }

    #[tokio::test]
    async fn reset_clears_counts_but_keeps_constraints() {
        let constraints = ToolConstraints::new(vec!["get_quote".into()]).max_calls("get_quote", 1);
        let consumer = BudgetConsumer::new(constraints).unwrap();
        consumer.consume_tools("get_quote").await.unwrap();
        assert!(!consumer.has_credits_for("get_quote"));
        consumer.reset();
        assert!(consumer.has_credits_for("get_quote"));
    }

    #[test]
    fn unbounded_tool_always_has_credits() {
        let consumer = BudgetConsumer::new(ToolConstraints::new(vec!["get_quote".into()])).unwrap();
        assert_eq!(consumer.get_remaining_credits("get_quote"), None);
        assert!(consumer.has_credits_for("get_quote"));
    }

    #[tokio::test]
    async fn explicit_max_of_zero_means_unlimited() {
        let constraints = ToolConstraints::new(vec!["get_quote".into()]).max_calls("get_quote", 0);
        let consumer = BudgetConsumer::new(constraints).unwrap();
        assert_eq!(consumer.get_remaining_credits("get_quote"), None);
        for _ in 0..25 {
            assert!(consumer.has_credits_for("get_quote"));
            consumer.consume_tools("get_quote").await.unwrap();
        }
        assert!(consumer.has_credits_for("get_quote"));
    }
}
