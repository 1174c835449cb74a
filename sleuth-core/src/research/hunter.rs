//! Hunter: executes a round of search queries concurrently.

use super::events::{NodeName, ResearchEvent};
use super::state::{ResearchState, SearchStep};
use super::StageResult;
use crate::error::ResearchError;
use crate::search::SearchProvider;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Hunter {
    search: Arc<dyn SearchProvider>,
}

impl Hunter {
    pub fn new(search: Arc<dyn SearchProvider>) -> Self {
        Self { search }
    }

    /// Run every planned query and buffer new results for extraction.
    ///
    /// A failed query is recorded in history and reported as a non-fatal
    /// error; it never fails the stage.
    pub async fn run(&self, mut state: ResearchState) -> StageResult {
        let queries = std::mem::take(&mut state.plan);
        info!(queries = queries.len(), provider = self.search.name(), "Searching");

        let outcomes = join_all(queries.iter().map(|q| self.search.search(q))).await;

        let mut seen: HashSet<String> = state.known_sources().map(str::to_string).collect();
        let mut events = Vec::new();

        for (query, outcome) in queries.into_iter().zip(outcomes) {
            match outcome {
                Ok(results) => {
                    let fresh: Vec<_> = results
                        .into_iter()
                        .filter(|r| seen.insert(r.url.clone()))
                        .collect();
                    let summary = if fresh.is_empty() {
                        "No relevant results found".to_string()
                    } else {
                        format!("Found {} new sources", fresh.len())
                    };
                    info!(query = %query, new_sources = fresh.len(), "Search complete");
                    state.history.push(SearchStep::succeeded(query, summary));
                    state.pending_results.extend(fresh);
                }
                Err(e) => {
                    warn!(query = %query, error = %e, "Search failed");
                    let error = ResearchError::Search {
                        query: query.clone(),
                        message: e.to_string(),
                    };
                    events.push(ResearchEvent::error(Some(NodeName::Hunter), &error));
                    state.history.push(SearchStep::failed(query, e.to_string()));
                }
            }
        }

        Ok((state, events))
    }
}
