//! Analyst: writes the cited report.
//!
//! Facts are presented to the model as a numbered list; the model cites them
//! as `[n]`. After generation every marker is checked against the fact store:
//! markers that resolve become the draft's citations, the rest are removed.
//! The `## Sources` section is generated here, not by the model.

use super::events::ResearchEvent;
use super::facts::{FactId, FactStore};
use super::state::{Draft, ResearchState};
use super::StageResult;
use crate::brain::Brain;
use crate::error::ResearchError;
use crate::types::ModelVariant;
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

static CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]?\[(\d+)\]").expect("citation pattern is valid"));

/// A heading line that is exactly a sources or references title.
static SOURCES_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*#{1,3}[ \t]*(?:sources|references)[ \t]*$")
        .expect("sources heading pattern is valid")
});

const SYSTEM_PROMPT: &str = "You are a senior research analyst. Synthesize the research context into a report.

1. Write clear, professional Markdown with headings.
2. Start with an Executive Summary.
3. Group key findings by theme, then give analysis and conclusions.
4. Support every factual claim with the number of the context entry it comes from, written as [n].
5. Only use facts from the research context. Do not invent sources.
6. Do not write a sources or references section; it is added automatically.
7. If feedback on a previous draft is given, fix those issues first.";

const SOURCES_HEADING: &str = "## Sources";

pub struct Analyst {
    brain: Arc<Brain>,
}

impl Analyst {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }

    pub async fn run(&self, mut state: ResearchState) -> StageResult {
        let draft = if state.facts.is_empty() {
            info!("No facts gathered, writing empty-findings report");
            Draft {
                text: no_facts_report(state.task()),
                citations: Vec::new(),
            }
        } else {
            let user = build_prompt(
                state.task(),
                &state.facts,
                state.critique_feedback.as_deref(),
            );
            if state.critique_feedback.is_some() {
                info!(revision = state.critique_count, "Revising report after critique");
            }
            let raw = self
                .brain
                .invoke_text(ModelVariant::Reasoning, SYSTEM_PROMPT, &user)
                .await
                .map_err(|e| ResearchError::Synthesis {
                    message: e.to_string(),
                })?;
            finalize_draft(&raw, &state.facts)
        };

        info!(
            chars = draft.text.len(),
            citations = draft.citations.len(),
            "Report drafted"
        );
        let event = ResearchEvent::report_chunk(&draft.text);
        state.draft = Some(draft);
        Ok((state, vec![event]))
    }
}

fn build_prompt(task: &str, facts: &FactStore, feedback: Option<&str>) -> String {
    let context = facts
        .iter()
        .enumerate()
        .map(|(i, f)| format!("[{}] {} (Source: {})", i + 1, f.text, f.source))
        .collect::<Vec<_>>()
        .join("\n");
    let mut prompt = format!("Task: {}\n\nResearch context:\n{}", task, context);
    if let Some(feedback) = feedback {
        prompt.push_str(&format!(
            "\n\nCRITICAL FEEDBACK FROM PREVIOUS DRAFT:\n{}\n\nAddress these issues in your revised report.",
            feedback
        ));
    }
    prompt
}

fn no_facts_report(task: &str) -> String {
    format!(
        "# Research Report\n\n**Task:** {}\n\nNo facts were discovered while researching this task. \
         Every search either failed or returned nothing relevant, so no findings can be reported.",
        task
    )
}

/// Byte offset of a trailing model-written sources section, if any.
///
/// Only the last heading-level section counts; a matching heading followed by
/// further headings is part of the body.
fn model_sources_start(raw: &str) -> Option<usize> {
    let heading = SOURCES_SECTION.find_iter(raw).last()?;
    let tail_has_heading = raw[heading.end()..]
        .lines()
        .any(|line| line.trim_start().starts_with('#'));
    (!tail_has_heading).then_some(heading.start())
}

/// Strip dangling citations and append the generated sources section.
pub fn finalize_draft(raw: &str, facts: &FactStore) -> Draft {
    let body = &raw[..model_sources_start(raw).unwrap_or(raw.len())];

    let mut citations: Vec<FactId> = Vec::new();
    let mut cited = HashSet::new();
    let mut dangling = 0usize;

    let cleaned = CITATION.replace_all(body, |caps: &Captures| {
        let fact = caps[1].parse::<usize>().ok().and_then(|n| facts.by_citation(n));
        match fact {
            Some(fact) => {
                if cited.insert(fact.id.clone()) {
                    citations.push(fact.id.clone());
                }
                caps[0].to_string()
            }
            None => {
                dangling += 1;
                String::new()
            }
        }
    });

    if dangling > 0 {
        warn!(dangling, "Removed citations that match no gathered fact");
    }

    let mut text = cleaned.trim_end().to_string();
    if !citations.is_empty() {
        let mut numbered: Vec<(usize, &str)> = citations
            .iter()
            .filter_map(|id| Some((facts.position(id)?, facts.get(id)?.source.as_str())))
            .collect();
        numbered.sort_by_key(|(n, _)| *n);

        text.push_str("\n\n");
        text.push_str(SOURCES_HEADING);
        text.push('\n');
        for (n, source) in numbered {
            text.push_str(&format!("\n[{}] {}", n, source));
        }
    }

    Draft { text, citations }
}
