//! # Sleuth Core
//!
//! Core library for the Sleuth deep-research orchestrator.
//! Provides the bounded research pipeline, the deduplicated fact store,
//! the LLM interface (brain), search providers, configuration, and the
//! SSE gateway.

pub mod brain;
pub mod config;
pub mod error;
pub mod gateway;
pub mod providers;
pub mod research;
pub mod search;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, LlmProvider, MockLlmProvider};
pub use config::{SleuthConfig, load_config};
pub use error::{LlmError, ResearchError, Result, SearchError, SleuthError, TransportError};
pub use research::{
    EventSink, EventType, Fact, FactId, FactStore, NodeName, Orchestrator, ResearchEvent,
    ResearchHandle, ResearchOptions, ResearchReport, ResearchState,
};
pub use search::{MockSearchProvider, RawSearchResult, SearchProvider, build_search_provider};
pub use types::{CompletionRequest, CompletionResponse, Message, ModelVariant, Role, TokenUsage};
