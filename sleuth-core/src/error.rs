//! Error types for the Sleuth research core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the language model, search, configuration, transport, and the
//! research pipeline itself.

use std::path::PathBuf;

/// Top-level error type for the Sleuth core library.
#[derive(Debug, thiserror::Error)]
pub enum SleuthError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from language model interactions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from a single search provider call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("Search request for '{query}' failed: {message}")]
    Request { query: String, message: String },

    #[error("Search response for '{query}' could not be parsed: {message}")]
    ResponseParse { query: String, message: String },

    #[error("Search provider {provider} rejected the API key")]
    AuthFailed { provider: String },

    #[error("Search for '{query}' timed out after {timeout_secs}s")]
    Timeout { query: String, timeout_secs: u64 },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors raised while relaying events to a subscriber.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Event subscriber disconnected")]
    Disconnected,

    #[error("Event delivery failed: {message}")]
    Delivery { message: String },
}

/// Errors raised by the research pipeline stages.
///
/// Only `Planning`, `Synthesis`, `Transport` and `Cancelled` end a task; the
/// rest are absorbed at the stage boundary and surfaced as non-fatal events.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResearchError {
    #[error("Planning failed: {message}")]
    Planning { message: String },

    #[error("Report synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Search for '{query}' failed: {message}")]
    Search { query: String, message: String },

    #[error("Fact extraction from {source_ref} failed: {message}")]
    Extraction { source_ref: String, message: String },

    #[error("Review failed, draft approved without review: {message}")]
    Review { message: String },

    #[error("Event transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Research task was cancelled")]
    Cancelled,
}

impl ResearchError {
    /// Stable snake_case identifier carried in `error` events.
    pub fn kind(&self) -> &'static str {
        match self {
            ResearchError::Planning { .. } => "planning_error",
            ResearchError::Synthesis { .. } => "synthesis_error",
            ResearchError::Search { .. } => "search_error",
            ResearchError::Extraction { .. } => "extraction_error",
            ResearchError::Review { .. } => "review_error",
            ResearchError::Transport(_) => "transport_error",
            ResearchError::Cancelled => "cancelled",
        }
    }

    /// Whether this error terminates the research task.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ResearchError::Planning { .. }
                | ResearchError::Synthesis { .. }
                | ResearchError::Transport(_)
                | ResearchError::Cancelled
        )
    }
}

/// A type alias for results using the top-level `SleuthError`.
pub type Result<T> = std::result::Result<T, SleuthError>;
