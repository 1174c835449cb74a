//! Research task state.
//!
//! A `ResearchState` is owned by exactly one orchestrator run. Stages take it
//! by value and hand back the updated state; the orchestrator only commits a
//! stage's output once the stage has succeeded.

use super::facts::{FactId, FactStore};
use crate::search::RawSearchResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a task currently is in the research cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Searching,
    Extracting,
    Writing,
    Reviewing,
    Done,
    Error,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Error)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Planning => "planning",
            Phase::Searching => "searching",
            Phase::Extracting => "extracting",
            Phase::Writing => "writing",
            Phase::Reviewing => "reviewing",
            Phase::Done => "done",
            Phase::Error => "error",
        };
        f.write_str(name)
    }
}

/// One executed search query and what came of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStep {
    pub query: String,
    /// Short human-readable outcome, never raw result content.
    pub result_summary: String,
    /// Set when the query failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchStep {
    pub fn succeeded(query: impl Into<String>, result_summary: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            result_summary: result_summary.into(),
            error: None,
        }
    }

    pub fn failed(query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            result_summary: "Search failed".to_string(),
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// A written report and the facts it cites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub text: String,
    /// Cited fact ids in order of first citation.
    pub citations: Vec<FactId>,
}

/// Full state of one research task.
#[derive(Debug, Clone)]
pub struct ResearchState {
    task_id: Uuid,
    task: String,
    started_at: DateTime<Utc>,
    pub phase: Phase,
    /// Queries chosen by the most recent planning step.
    pub plan: Vec<String>,
    /// Whether the last plan judged the facts sufficient.
    pub sufficient: bool,
    pub facts: FactStore,
    pub history: Vec<SearchStep>,
    /// Results of the current round, consumed by extraction.
    pub pending_results: Vec<RawSearchResult>,
    pub iteration_count: usize,
    pub critique_count: usize,
    pub draft: Option<Draft>,
    pub critique_feedback: Option<String>,
    pub approved: bool,
    pub forced_approval: bool,
}

impl ResearchState {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            task: task.into(),
            started_at: Utc::now(),
            phase: Phase::Planning,
            plan: Vec::new(),
            sufficient: false,
            facts: FactStore::new(),
            history: Vec::new(),
            pending_results: Vec::new(),
            iteration_count: 0,
            critique_count: 0,
            draft: None,
            critique_feedback: None,
            approved: false,
            forced_approval: false,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Move to `Error`, returning the phase the task failed in.
    pub fn fail(&mut self) -> Phase {
        std::mem::replace(&mut self.phase, Phase::Error)
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Compact log of past queries for planning prompts.
    pub fn history_log(&self) -> String {
        self.history
            .iter()
            .map(|step| match &step.error {
                Some(err) => format!("- \"{}\": failed ({})", step.query, err),
                None => format!("- \"{}\": {}", step.query, step.result_summary),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// URLs already represented in the store.
    pub fn known_sources(&self) -> impl Iterator<Item = &str> {
        self.facts.iter().map(|f| f.source.as_str())
    }
}
