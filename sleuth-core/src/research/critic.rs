//! Critic: reviews a draft against the gathered evidence.

use super::events::{NodeName, ResearchEvent};
use super::state::ResearchState;
use super::StageResult;
use crate::brain::Brain;
use crate::error::ResearchError;
use crate::types::ModelVariant;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You are a research quality critic. Review the draft report against the evidence.

Check:
1. Factual accuracy: every claim is supported by the evidence.
2. Citations: claims cite the numbered evidence they rely on.
3. Task alignment: the report answers the research task.
4. Completeness: no significant gaps.
5. Clarity: the report is well structured.

Approve only if all criteria are met. When rejecting, give specific, actionable feedback that names the exact problems.

Reply with a JSON object: {\"approved\": bool, \"feedback\": string}.";

/// Sent back to the writer when a rejection carries no feedback.
const UNSPECIFIED_FEEDBACK: &str =
    "The reviewer rejected the draft without details. Re-check every claim against the evidence and cite it.";

/// The reviewer's decision on a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub approved: bool,
    #[serde(default)]
    pub feedback: String,
}

pub struct Critic {
    brain: Arc<Brain>,
}

impl Critic {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }

    /// Review the current draft.
    ///
    /// A failed review approves the draft and reports a non-fatal error.
    pub async fn run(&self, mut state: ResearchState) -> StageResult {
        info!(attempt = state.critique_count + 1, "Reviewing report");
        let draft = state.draft.as_ref().map(|d| d.text.as_str()).unwrap_or_default();

        let evidence = if state.facts.is_empty() {
            "No evidence was gathered.".to_string()
        } else {
            state
                .facts
                .iter()
                .enumerate()
                .map(|(i, f)| format!("[{}] {} ({})", i + 1, f.text, f.source))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let user = format!(
            "Task: {}\n\nEvidence:\n{}\n\nDraft to review:\n{}",
            state.task(),
            evidence,
            draft
        );

        let mut events = Vec::new();
        let mut verdict = match self
            .brain
            .invoke_structured::<ReviewVerdict>(ModelVariant::Reasoning, SYSTEM_PROMPT, &user)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "Review failed, approving draft unreviewed");
                let error = ResearchError::Review {
                    message: e.to_string(),
                };
                events.push(ResearchEvent::error(Some(NodeName::Critic), &error));
                ReviewVerdict {
                    approved: true,
                    feedback: String::new(),
                }
            }
        };

        if !verdict.approved && verdict.feedback.trim().is_empty() {
            verdict.feedback = UNSPECIFIED_FEEDBACK.to_string();
        }

        info!(approved = verdict.approved, "Review complete");
        events.push(ResearchEvent::review_verdict(
            verdict.approved,
            &verdict.feedback,
        ));

        state.approved = verdict.approved;
        state.critique_feedback = if verdict.approved {
            None
        } else {
            Some(verdict.feedback)
        };
        Ok((state, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::error::LlmError;
    use crate::research::events::EventType;
    use crate::research::state::Draft;
    use serde_json::json;

    fn drafted() -> ResearchState {
        let mut state = ResearchState::new("task");
        state.draft = Some(Draft {
            text: "Draft body".into(),
            citations: Vec::new(),
        });
        state
    }

    #[tokio::test]
    async fn test_rejection_sets_feedback() {
        let mock = Arc::new(MockLlmProvider::new());
        mock.queue_json(json!({"approved": false, "feedback": "Cite a source for the second claim."}));
        let critic = Critic::new(Arc::new(Brain::single(mock.clone())));

        let (state, events) = critic.run(drafted()).await.unwrap();
        assert!(!state.approved);
        assert_eq!(
            state.critique_feedback.as_deref(),
            Some("Cite a source for the second claim.")
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::StatusUpdate);
        assert_eq!(events[0].data["approved"], false);
        assert!(mock.requests()[0].messages[1].content.contains("Draft body"));
    }

    #[tokio::test]
    async fn test_blank_rejection_gets_generic_feedback() {
        let mock = Arc::new(MockLlmProvider::new());
        mock.queue_json(json!({"approved": false, "feedback": "   "}));
        let critic = Critic::new(Arc::new(Brain::single(mock)));

        let (state, events) = critic.run(drafted()).await.unwrap();
        assert!(!state.approved);
        assert_eq!(state.critique_feedback.as_deref(), Some(UNSPECIFIED_FEEDBACK));
        assert_eq!(events[0].data["feedback"], UNSPECIFIED_FEEDBACK);
    }

    #[tokio::test]
    async fn test_approval_clears_feedback() {
        let mock = Arc::new(MockLlmProvider::new());
        mock.queue_json(json!({"approved": true, "feedback": ""}));
        let critic = Critic::new(Arc::new(Brain::single(mock)));

        let mut state = drafted();
        state.critique_feedback = Some("old".into());
        let (state, _) = critic.run(state).await.unwrap();
        assert!(state.approved);
        assert!(state.critique_feedback.is_none());
    }

    #[tokio::test]
    async fn test_failure_fails_open() {
        let mock = Arc::new(MockLlmProvider::new());
        mock.queue_error(LlmError::ApiRequest {
            message: "bad request".into(),
        });
        let critic = Critic::new(Arc::new(Brain::single(mock)));

        let (state, events) = critic.run(drafted()).await.unwrap();
        assert!(state.approved);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data["kind"], "review_error");
        assert_eq!(events[0].data["fatal"], false);
        assert_eq!(events[1].data["approved"], true);
    }
}
