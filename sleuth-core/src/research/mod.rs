//! Deep research pipeline.
//!
//! A bounded plan → search → extract loop feeds a bounded write → review
//! loop:
//! 1. **Strategist** plans search queries or declares the facts sufficient
//! 2. **Hunter** runs the queries concurrently
//! 3. **Curator** distills results into deduplicated facts
//! 4. **Analyst** writes a cited report
//! 5. **Critic** approves it or sends it back with feedback
//!
//! The [`Orchestrator`] owns the state, routes between stages and streams
//! [`ResearchEvent`]s to an [`EventSink`].

pub mod analyst;
pub mod critic;
pub mod curator;
pub mod events;
pub mod facts;
pub mod hunter;
pub mod orchestrator;
pub mod output;
pub mod state;
pub mod strategist;

pub use events::{ChannelSink, EventSink, EventType, NodeName, RecordingSink, ResearchEvent};
pub use facts::{Fact, FactId, FactStore, MergeOutcome};
pub use orchestrator::{Orchestrator, ResearchHandle, ResearchOptions, ReviewRoute, SearchRoute};
pub use output::ResearchReport;
pub use state::{Draft, Phase, ResearchState, SearchStep};

use crate::error::ResearchError;

/// What a stage hands back: the updated state and the events it produced.
pub type StageResult = Result<(ResearchState, Vec<ResearchEvent>), ResearchError>;

/// Cut `text` to at most `max` characters, marking the cut with `...`.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
