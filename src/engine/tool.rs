//! The [`Tool`] trait and [`ToolRegistry`] (spec.md §4.2).
//!
//! A tool is a named callable exposed to the LLM with a JSON-schema'd parameter set.
//! Whether a given call is serviced locally or by the LLM platform (a "hosted" tool,
//! e.g. web search) is a *runtime* distinction, not a schema one: it is decided purely
//! by whether the name is present in the registry at dispatch time (see
//! [`ConversationRuntime`](crate::engine::conversation::ConversationRuntime)).
//!
//! # Example
//!
//! ```rust
//! use analysis_engine::engine::bag::Key;
//! use analysis_engine::engine::error::ToolRunError;
//! use analysis_engine::engine::tool::{Tool, ToolDef, ToolRegistry};
//! use async_trait::async_trait;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Tool for Echo {
//!     fn name(&self) -> &str { "echo" }
//!     fn key(&self) -> Key { Key::ToolResult("echo".into()) }
//!     fn description(&self) -> &str { "Echoes the input back." }
//!     fn definition(&self) -> ToolDef {
//!         ToolDef::function(
//!             "echo",
//!             "Echoes the input back.",
//!             serde_json::json!({
//!                 "type": "object",
//!                 "properties": {"text": {"type": "string"}},
//!                 "required": ["text"],
//!                 "additionalProperties": false
//!             }),
//!         )
//!     }
//!     fn tags(&self) -> &[String] { &[] }
//!     fn is_external(&self) -> bool { false }
//!     async fn run(&self, _ctx: (), args: &str) -> Result<String, ToolRunError> {
//!         Ok(args.to_string())
//!     }
//! }
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(std::sync::Arc::new(Echo));
//! assert!(registry.get("echo").is_some());
//! assert!(registry.get("web_search").is_none());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::bag::Key;
use crate::engine::error::ToolRunError;

/// The wire shape of a tool descriptor sent alongside an LLM request.
///
/// Both variants carry the same payload (`name`, `description`, `parameters`); the
/// `type` tag simply tells the provider which calling convention to use. Per spec.md
/// §6, `parameters` must be a strict JSON schema: every listed property is required,
/// and optional fields are omitted from the schema entirely rather than marked
/// optional — there is no partial-strictness mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolDef {
    /// A standard function-calling tool.
    Function(ToolDefPayload),
    /// A provider-specific "custom" tool (e.g. freeform text input instead of JSON args).
    Custom(ToolDefPayload),
}

/// Shared payload carried by both [`ToolDef`] arms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefPayload {
    /// Tool name as it will appear in the `tools` array and in emitted tool calls.
    pub name: String,
    /// Human-readable description surfaced to the LLM to aid tool selection.
    pub description: String,
    /// JSON Schema object describing accepted parameters, with `additionalProperties: false`
    /// and every declared property present in `required`.
    pub parameters: serde_json::Value,
}

impl ToolDef {
    /// Build a `function`-typed descriptor.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        ToolDef::Function(ToolDefPayload {
            name: name.into(),
            description: description.into(),
            parameters,
        })
    }

    /// Build a `custom`-typed descriptor.
    pub fn custom(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        ToolDef::Custom(ToolDefPayload {
            name: name.into(),
            description: description.into(),
            parameters,
        })
    }

    /// Borrow the shared payload regardless of which arm this is.
    pub fn payload(&self) -> &ToolDefPayload {
        match self {
            ToolDef::Function(p) | ToolDef::Custom(p) => p,
        }
    }
}

/// A named callable exposed to the LLM.
///
/// `Run`'s context parameter is left generic-free here (`()`) in the trait signature so
/// tools stay simple to implement; production tools close over whatever they need
/// (an HTTP client, a [`SharedBag`](crate::engine::bag::SharedBag) handle) in their own
/// constructor rather than threading it through `Run`. Concrete domain tools (equity
/// data, news, economic data) are external collaborators per spec.md §1 — this crate
/// only defines the trait and the dispatch loop around it.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable identifier visible to the LLM, e.g. `"get_quote"`.
    fn name(&self) -> &str;
    /// Bag-internal identifier used to namespace this tool's cached results.
    fn key(&self) -> Key;
    /// Human-readable description surfaced in the tool's [`ToolDef`].
    fn description(&self) -> &str;
    /// The JSON-schema-carrying descriptor sent to the LLM.
    fn definition(&self) -> ToolDef;
    /// Free-form tags used for grouping/filtering in engine tool constraints.
    fn tags(&self) -> &[String];
    /// `true` if this call should be serviced by the LLM platform rather than locally.
    /// Tools actually registered here are by definition local; hosted tools are
    /// identified by *absence* from the registry at dispatch time (see
    /// [`ConversationRuntime`](crate::engine::conversation::ConversationRuntime)), so
    /// registered implementations return `false`.
    fn is_external(&self) -> bool {
        false
    }
    /// Execute the tool against raw JSON arguments supplied by the LLM.
    async fn run(&self, ctx: (), args: &str) -> Result<String, ToolRunError>;
}

/// Name-keyed map of locally-executable tools.
///
/// Populated at initialization and treated as immutable for the remainder of a run —
/// nothing in the conversation loop mutates it, and [`ToolRegistry::register`] is only
/// ever called during setup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Register a tool under its own [`Tool::name`]. Replaces any prior registration
    /// under the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name. `None` means the name is either unregistered (and thus
    /// hosted per the runtime's dispatch policy) or never existed.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// True if `name` is registered locally.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All registered tools' wire descriptors, in registration order is not guaranteed
    /// (backed by a `HashMap`) but every entry is stable across calls for a given set
    /// of registrations.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Tool for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        fn key(&self) -> Key {
            Key::ToolResult("noop".into())
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        fn definition(&self) -> ToolDef {
            ToolDef::function("noop", "does nothing", serde_json::json!({"type": "object"}))
        }
        fn tags(&self) -> &[String] {
            &[]
        }
        async fn run(&self, _ctx: (), _args: &str) -> Result<String, ToolRunError> {
            Ok(String::new())
        }
    }

    #[test]
    fn unregistered_name_is_none() {
        let registry = ToolRegistry::new();
        assert!(registry.get("web_search").is_none());
    }

    #[test]
    fn registered_tool_is_found_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Noop));
        assert!(registry.contains("noop"));
        assert_eq!(registry.definitions().len(), 1);
    }

    #[test]
    fn re_registering_same_name_replaces() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Noop));
        registry.register(Arc::new(Noop));
        assert_eq!(registry.len(), 1);
    }
}
