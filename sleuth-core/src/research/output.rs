//! Final research report.

use super::facts::FactId;
use super::state::ResearchState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fact cited by the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// The `[n]` number used in the report text.
    pub number: usize,
    pub fact_id: FactId,
    pub text: String,
    pub source: String,
}

/// Summary of a finished research task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub task_id: Uuid,
    pub task: String,
    /// Markdown report text.
    pub report: String,
    pub facts_count: usize,
    pub sources_count: usize,
    pub iterations: usize,
    pub critique_count: usize,
    pub approved: bool,
    /// True when the revision bound released the report without approval.
    pub forced_approval: bool,
    pub citations: Vec<Citation>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ResearchReport {
    pub fn from_state(state: &ResearchState) -> Self {
        let (report, citations) = match &state.draft {
            Some(draft) => {
                let mut citations: Vec<Citation> = draft
                    .citations
                    .iter()
                    .filter_map(|id| {
                        let fact = state.facts.get(id)?;
                        Some(Citation {
                            number: state.facts.position(id)?,
                            fact_id: id.clone(),
                            text: fact.text.clone(),
                            source: fact.source.clone(),
                        })
                    })
                    .collect();
                citations.sort_by_key(|c| c.number);
                (draft.text.clone(), citations)
            }
            None => (String::new(), Vec::new()),
        };

        Self {
            task_id: state.task_id(),
            task: state.task().to_string(),
            report,
            facts_count: state.facts.len(),
            sources_count: state.facts.unique_sources().len(),
            iterations: state.iteration_count,
            critique_count: state.critique_count,
            approved: state.approved,
            forced_approval: state.forced_approval,
            citations,
            started_at: state.started_at(),
            completed_at: Utc::now(),
        }
    }

    /// One-line summary for logs and terminal output.
    pub fn summary_line(&self) -> String {
        let status = if self.forced_approval {
            "released at revision limit"
        } else if self.approved {
            "approved"
        } else {
            "unapproved"
        };
        format!(
            "{} facts from {} sources, {} search rounds, {} critiques, {}",
            self.facts_count, self.sources_count, self.iterations, self.critique_count, status
        )
    }
}
