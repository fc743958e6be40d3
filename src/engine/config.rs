//! Engine-wide configuration.
//!
//! Provides [`EngineConfig`] for the handful of settings that are ambient to every
//! component (HTTP timeouts, default round/poll limits) rather than specific to any one
//! engine. Loading this from a file or environment variables is the CLI's job (an
//! external collaborator per spec); this struct is constructed directly, the same way
//! the teacher crate's own config struct is.
//!
//! # Example
//!
//! ```rust
//! use analysis_engine::engine::config::EngineConfig;
//!
//! let config = EngineConfig::default();
//! assert_eq!(config.max_rounds, 6);
//!
//! let config = EngineConfig {
//!     max_rounds: 10,
//!     ..EngineConfig::default()
//! };
//! assert_eq!(config.max_rounds, 10);
//! ```

use std::time::Duration;

/// Global configuration for the orchestrator and its components.
///
/// Intentionally minimal: no TOML/YAML/env parsing dependency is introduced here, since
/// config *loading* is an external collaborator's responsibility.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the LLM vendor's API (sync and batch share the same host).
    pub llm_base_url: String,
    /// Default model identifier used when an engine doesn't specify one.
    pub default_model: String,
    /// Default cap on [`ConversationRuntime`](crate::engine::conversation::ConversationRuntime)
    /// rounds, per spec.md §4.4.
    pub max_rounds: u32,
    /// Interval between [`BatchManager::wait_for_completion`](crate::engine::batch::BatchManager::wait_for_completion)
    /// polls.
    pub batch_poll_interval: Duration,
    /// Timeout applied to the outbound HTTP client used for synchronous LLM calls.
    pub http_timeout: Duration,
    /// [`HttpMiddleware`](crate::engine::transport::HttpMiddleware) retry/backoff parameters.
    pub retry: RetryConfig,
    /// Whether this run should submit conversations through the batch API rather than
    /// synchronously. Published into the bag under `Key::BatchMode` by the `llm_client`
    /// init step; read by callers deciding whether to call
    /// [`LLMClient::ask`](crate::engine::client::LLMClient::ask) or
    /// [`LLMClient::do_batch`](crate::engine::client::LLMClient::do_batch).
    pub batch_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm_base_url: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-4o".to_string(),
            max_rounds: 6,
            batch_poll_interval: Duration::from_secs(5),
            http_timeout: Duration::from_secs(300),
            retry: RetryConfig::default(),
            batch_mode: false,
        }
    }
}

/// Exponential backoff parameters for [`HttpMiddleware`](crate::engine::transport::HttpMiddleware).
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling applied to the computed backoff delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub exponential_base: f64,
    /// Fraction of the computed delay randomized away to avoid thundering herds.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter_factor: 0.2,
        }
    }
}
