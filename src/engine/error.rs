//! Error types shared across the engine.
//!
//! Every fallible boundary in this crate returns one of the enums below rather than
//! `Box<dyn Error>` directly, so callers can match on a specific failure mode where it
//! matters (budget exhaustion vs. a transport error, say) while still being able to box
//! and propagate with `?` through functions that return `Box<dyn Error + Send + Sync>`.

use std::fmt;

/// Failure reading or writing a [`SharedBag`](crate::engine::bag::SharedBag) entry.
#[derive(Debug, Clone)]
pub enum BagError {
    /// `MustGet` was called for a key that has never been `Set`.
    MissingKey(String),
    /// `GetAs` found the key but the stored value's concrete type didn't match.
    TypeMismatch {
        /// Key whose value had an unexpected type.
        key: String,
        /// Type name the caller asked for.
        expected: &'static str,
    },
}

impl fmt::Display for BagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BagError::MissingKey(key) => write!(f, "shared bag: required key absent: {key}"),
            BagError::TypeMismatch { key, expected } => write!(
                f,
                "shared bag: key {key} did not hold the expected type {expected}"
            ),
        }
    }
}

impl std::error::Error for BagError {}

/// Failure enforcing or consuming a tool-call budget.
#[derive(Debug, Clone)]
pub enum BudgetError {
    /// The tool has already been called `max_calls` times this conversation.
    Exhausted(String),
    /// A tool named in `min`/`max`/`required` isn't present in `tools`.
    UnknownTool(String),
}

impl fmt::Display for BudgetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetError::Exhausted(tool) => write!(f, "budget exhausted for tool \"{tool}\""),
            BudgetError::UnknownTool(tool) => {
                write!(f, "tool \"{tool}\" referenced in constraints but not declared")
            }
        }
    }
}

impl std::error::Error for BudgetError {}

/// Failure running a registered [`Tool`](crate::engine::tool::Tool).
#[derive(Debug, Clone)]
pub enum ToolRunError {
    /// The tool implementation itself returned an error.
    ExecutionFailed(String),
    /// The arguments the LLM supplied didn't parse as valid JSON.
    InvalidArguments(String),
}

impl fmt::Display for ToolRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolRunError::ExecutionFailed(msg) => write!(f, "tool execution failed: {msg}"),
            ToolRunError::InvalidArguments(msg) => write!(f, "invalid tool arguments: {msg}"),
        }
    }
}

impl std::error::Error for ToolRunError {}

/// Failure driving a [`ConversationRuntime`](crate::engine::conversation::ConversationRuntime).
#[derive(Debug, Clone)]
pub enum ConversationError {
    /// The underlying [`Session`](crate::engine::conversation::Session) failed to produce a turn.
    Session(String),
    /// `ConsumeTools` returned an error other than plain exhaustion (budget invariant violation).
    Budget(BudgetError),
}

impl fmt::Display for ConversationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationError::Session(msg) => write!(f, "session error: {msg}"),
            ConversationError::Budget(e) => write!(f, "budget error: {e}"),
        }
    }
}

impl std::error::Error for ConversationError {}

impl From<BudgetError> for ConversationError {
    fn from(e: BudgetError) -> Self {
        ConversationError::Budget(e)
    }
}

/// Failure submitting, polling, or reading back a batch job.
#[derive(Debug, Clone)]
pub enum BatchError {
    /// The vendor HTTP call itself failed (transport, non-2xx, malformed body).
    Transport(String),
    /// `WaitForCompletion` observed a terminal status other than `completed`.
    Terminal {
        /// The job id that reached a non-completed terminal state.
        job_id: String,
        /// The terminal status observed (`failed`, `expired`, or `cancelled`).
        status: String,
    },
    /// A result or error line in the output file didn't parse as expected.
    MalformedLine(String),
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchError::Transport(msg) => write!(f, "batch transport error: {msg}"),
            BatchError::Terminal { job_id, status } => {
                write!(f, "batch job {job_id} ended in terminal state \"{status}\"")
            }
            BatchError::MalformedLine(msg) => write!(f, "malformed batch result line: {msg}"),
        }
    }
}

impl std::error::Error for BatchError {}

/// Failure during orchestrator initialization or pipeline execution.
#[derive(Debug)]
pub enum OrchestratorError {
    /// An initialization step failed; the name identifies which one.
    InitStep {
        /// Name of the step that failed (e.g. `"load_profile"`).
        step: String,
        /// The underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// `EngineRegistry::build` failed, e.g. because a dependency was missing.
    RegistryBuild(String),
    /// An engine's `Execute` returned an error; the name identifies which one.
    EngineFailed {
        /// Name of the engine that failed.
        engine: String,
        /// The underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::InitStep { step, source } => {
                write!(f, "initialization step \"{step}\" failed: {source}")
            }
            OrchestratorError::RegistryBuild(msg) => write!(f, "engine registry build failed: {msg}"),
            OrchestratorError::EngineFailed { engine, source } => {
                write!(f, "engine \"{engine}\" failed: {source}")
            }
        }
    }
}

impl std::error::Error for OrchestratorError {}
