//! Curator: distills raw search results into atomic facts.

use super::events::{NodeName, ResearchEvent};
use super::facts::Fact;
use super::state::ResearchState;
use super::StageResult;
use crate::brain::Brain;
use crate::error::{LlmError, ResearchError};
use crate::search::RawSearchResult;
use crate::types::ModelVariant;
use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You extract facts from web search results for a research task.

Rules:
1. Each fact is atomic: a single piece of information.
2. Keep specific numbers, dates and names.
3. Discard promotional content and filler.
4. If the text is irrelevant to the task, set is_relevant to false and return no facts.

Reply with a JSON object: {\"facts\": [string], \"is_relevant\": bool}.";

#[derive(Debug, Deserialize)]
struct ExtractionReply {
    #[serde(default)]
    facts: Vec<String>,
    #[serde(default = "default_relevant")]
    is_relevant: bool,
}

fn default_relevant() -> bool {
    true
}

pub struct Curator {
    brain: Arc<Brain>,
}

impl Curator {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }

    async fn extract(&self, task: &str, result: &RawSearchResult) -> Result<Vec<Fact>, LlmError> {
        let user = format!(
            "Task: {}\n\nSource: {}\nTitle: {}\n\nText:\n{}",
            task, result.url, result.title, result.content
        );
        let reply: ExtractionReply = self
            .brain
            .invoke_structured(ModelVariant::Fast, SYSTEM_PROMPT, &user)
            .await?;
        if !reply.is_relevant {
            return Ok(Vec::new());
        }
        Ok(reply
            .facts
            .into_iter()
            .map(|text| Fact::new(text, result.url.clone()))
            .collect())
    }

    /// Extract from every buffered result and merge into the fact store.
    ///
    /// Batches run concurrently; their facts are merged in result order so
    /// citation numbering is reproducible.
    pub async fn run(&self, mut state: ResearchState) -> StageResult {
        let results = std::mem::take(&mut state.pending_results);
        info!(sources = results.len(), "Extracting facts");

        let outcomes = join_all(results.iter().map(|r| self.extract(state.task(), r))).await;

        let mut events = Vec::new();
        let mut candidates = Vec::new();
        let mut failures = 0;
        for (result, outcome) in results.iter().zip(outcomes) {
            match outcome {
                Ok(facts) => candidates.extend(facts),
                Err(e) => {
                    failures += 1;
                    warn!(source = %result.url, error = %e, "Fact extraction failed");
                    let error = ResearchError::Extraction {
                        source_ref: result.url.clone(),
                        message: e.to_string(),
                    };
                    events.push(ResearchEvent::error(Some(NodeName::Curator), &error));
                }
            }
        }
        if !results.is_empty() && failures == results.len() {
            warn!(batches = failures, "Every extraction batch failed this round");
        }

        let extracted = candidates.len();
        let outcome = state.facts.merge(candidates);
        info!(
            extracted,
            new_facts = outcome.added.len(),
            duplicates = outcome.duplicates,
            total = state.facts.len(),
            "Facts merged"
        );
        events.push(ResearchEvent::facts_extracted(
            outcome.added.len(),
            state.facts.len(),
        ));

        Ok((state, events))
    }
}
