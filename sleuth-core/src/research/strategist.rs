//! Strategist: plans the next search round.

use super::events::{NodeName, ResearchEvent};
use super::state::ResearchState;
use super::StageResult;
use crate::brain::Brain;
use crate::error::ResearchError;
use crate::types::ModelVariant;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Characters of each fact shown to the planner.
const FACT_PREVIEW_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "You are a senior research strategist planning web research for a user task.

1. Read the task and the current knowledge carefully.
2. Identify the specific gaps that still need filling.
3. Propose at most {max_queries} targeted search queries. Be specific: include names, years and technical terms.
4. Use the past steps log to avoid repeating earlier or failed queries.
5. If the knowledge is already enough for a thorough report, set is_complete to true and return no queries.

Reply with a JSON object: {\"search_queries\": [string], \"is_complete\": bool}.";

#[derive(Debug, Deserialize)]
struct PlanReply {
    search_queries: Vec<String>,
    is_complete: bool,
}

/// The planner's decision for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOutcome {
    pub queries: Vec<String>,
    pub sufficient: bool,
}

impl PlanOutcome {
    /// Clean a raw query list: trim, drop blanks and duplicates, cap the count.
    ///
    /// An empty result, or an explicit completion flag, means sufficient.
    pub fn from_raw(raw: Vec<String>, is_complete: bool, max_queries: usize) -> Self {
        if is_complete {
            return Self {
                queries: Vec::new(),
                sufficient: true,
            };
        }
        let mut seen = HashSet::new();
        let queries: Vec<String> = raw
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .filter(|q| seen.insert(q.to_lowercase()))
            .take(max_queries)
            .collect();
        let sufficient = queries.is_empty();
        Self {
            queries,
            sufficient,
        }
    }
}

pub struct Strategist {
    brain: Arc<Brain>,
    max_queries: usize,
}

impl Strategist {
    pub fn new(brain: Arc<Brain>, max_queries: usize) -> Self {
        Self { brain, max_queries }
    }

    /// Ask the reasoning model for the next queries.
    pub async fn plan(
        &self,
        state: &ResearchState,
        max_iterations: usize,
    ) -> Result<PlanOutcome, ResearchError> {
        let knowledge = if state.facts.is_empty() {
            "No facts gathered yet.".to_string()
        } else {
            state.facts.digest(FACT_PREVIEW_CHARS)
        };
        let past_steps = if state.history.is_empty() {
            "No previous steps.".to_string()
        } else {
            state.history_log()
        };
        let user = format!(
            "Task: {}\n\nCurrent knowledge:\n{}\n\nPast steps:\n{}\n\nIteration: {}/{}",
            state.task(),
            knowledge,
            past_steps,
            state.iteration_count,
            max_iterations
        );
        let system = SYSTEM_PROMPT.replace("{max_queries}", &self.max_queries.to_string());

        let reply: PlanReply = self
            .brain
            .invoke_structured(ModelVariant::Reasoning, &system, &user)
            .await
            .map_err(|e| ResearchError::Planning {
                message: e.to_string(),
            })?;

        Ok(PlanOutcome::from_raw(
            reply.search_queries,
            reply.is_complete,
            self.max_queries,
        ))
    }

    pub async fn run(&self, mut state: ResearchState, max_iterations: usize) -> StageResult {
        info!(
            iteration = state.iteration_count,
            max_iterations,
            facts = state.facts.len(),
            "Planning next research round"
        );
        let outcome = self.plan(&state, max_iterations).await?;

        let event = if outcome.sufficient {
            info!("Facts judged sufficient, moving to synthesis");
            ResearchEvent::status(
                NodeName::Strategist,
                json!({ "sufficient": true }),
                "Sufficient information gathered",
            )
        } else {
            for (i, query) in outcome.queries.iter().enumerate() {
                debug!(n = i + 1, query = %query, "Planned query");
            }
            ResearchEvent::queries_generated(&outcome.queries)
        };

        state.plan = outcome.queries;
        state.sufficient = outcome.sufficient;
        Ok((state, vec![event]))
    }
}
