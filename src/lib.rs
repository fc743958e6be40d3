// src/lib.rs

// Import the top-level `engine` module.
pub mod engine;

// Re-exporting key items for easier external access.
pub use engine::{Engine, EngineRegistry, Key, LLMClient, Orchestrator, PromptRequest, SharedBag};
