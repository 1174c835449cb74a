//! Orchestrator: drives one research task through its phases.
//!
//! The orchestrator owns the task's [`ResearchState`] and moves it through a
//! closed set of phases. Both loops are bounded: at most `max_iterations`
//! search rounds and at most `max_critique_loops` rejected drafts, after
//! which the current draft is released with `forced_approval` set.
//!
//! Every stage is bracketed by `node_start` / `node_end` events, raced
//! against the task's cancellation token, and its own events are delivered
//! in order before the next stage begins.

use super::analyst::Analyst;
use super::critic::Critic;
use super::curator::Curator;
use super::events::{ChannelSink, EventSink, NodeName, ResearchEvent};
use super::hunter::Hunter;
use super::output::ResearchReport;
use super::state::{Phase, ResearchState};
use super::strategist::Strategist;
use super::StageResult;
use crate::brain::Brain;
use crate::config::{ResearchConfig, SleuthConfig};
use crate::error::{LlmError, ResearchError};
use crate::search::{SearchProvider, build_search_provider};
use crate::types::ModelVariant;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Events buffered between a spawned task and its consumer.
const EVENT_BUFFER: usize = 64;

/// Loop bounds for one research task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchOptions {
    pub max_iterations: usize,
    pub max_critique_loops: usize,
    pub max_queries_per_round: usize,
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            max_critique_loops: 3,
            max_queries_per_round: 3,
        }
    }
}

impl From<&ResearchConfig> for ResearchOptions {
    fn from(config: &ResearchConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_critique_loops: config.max_critique_loops,
            max_queries_per_round: config.max_queries_per_round,
        }
    }
}

/// Where to go after a search round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchRoute {
    ContinueSearch,
    Advance,
}

/// Where to go after a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewRoute {
    Approve,
    Revise,
    ForceApprove,
}

impl SearchRoute {
    /// Decide after a completed round; `iteration_count` already includes it.
    pub fn after_round(state: &ResearchState, options: &ResearchOptions) -> Self {
        if !state.sufficient && state.iteration_count < options.max_iterations {
            SearchRoute::ContinueSearch
        } else {
            SearchRoute::Advance
        }
    }
}

impl ReviewRoute {
    /// Decide after a review; `critique_count` already includes a rejection.
    pub fn after_review(state: &ResearchState, options: &ResearchOptions) -> Self {
        if state.approved {
            ReviewRoute::Approve
        } else if state.critique_count < options.max_critique_loops {
            ReviewRoute::Revise
        } else {
            ReviewRoute::ForceApprove
        }
    }
}

/// A running research task.
pub struct ResearchHandle {
    pub events: ReceiverStream<ResearchEvent>,
    pub cancel: CancellationToken,
    pub join: JoinHandle<Result<ResearchReport, ResearchError>>,
}

pub struct Orchestrator {
    brain: Arc<Brain>,
    search: Arc<dyn SearchProvider>,
    options: ResearchOptions,
    strategist: Strategist,
    hunter: Hunter,
    curator: Curator,
    analyst: Analyst,
    critic: Critic,
}

impl Orchestrator {
    pub fn new(brain: Arc<Brain>, search: Arc<dyn SearchProvider>, options: ResearchOptions) -> Self {
        Self {
            strategist: Strategist::new(Arc::clone(&brain), options.max_queries_per_round),
            hunter: Hunter::new(Arc::clone(&search)),
            curator: Curator::new(Arc::clone(&brain)),
            analyst: Analyst::new(Arc::clone(&brain)),
            critic: Critic::new(Arc::clone(&brain)),
            brain,
            search,
            options,
        }
    }

    /// Wire real providers from configuration.
    pub fn from_config(config: &SleuthConfig) -> Result<Self, LlmError> {
        let brain = Arc::new(Brain::from_config(&config.llm)?);
        let search = build_search_provider(&config.search);
        Ok(Self::new(brain, search, ResearchOptions::from(&config.research)))
    }

    /// Same providers, different loop bounds.
    pub fn with_options(&self, options: ResearchOptions) -> Self {
        Self::new(Arc::clone(&self.brain), Arc::clone(&self.search), options)
    }

    pub fn options(&self) -> &ResearchOptions {
        &self.options
    }

    pub fn model_name(&self, variant: ModelVariant) -> &str {
        self.brain.model_name(variant)
    }

    pub fn search_is_mock(&self) -> bool {
        self.search.is_mock()
    }

    /// Run `task` on a background task, streaming its events.
    pub fn spawn(self: &Arc<Self>, task: impl Into<String>) -> ResearchHandle {
        let (sink, rx) = ChannelSink::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let orchestrator = Arc::clone(self);
        let token = cancel.clone();
        let task = task.into();
        let join = tokio::spawn(async move { orchestrator.run(&task, &sink, token).await });
        ResearchHandle {
            events: ReceiverStream::new(rx),
            cancel,
            join,
        }
    }

    /// Run one research task to completion.
    ///
    /// Ends with `report_complete` and `complete` on success, or with a single
    /// fatal `error` event otherwise.
    pub async fn run(
        &self,
        task: &str,
        sink: &dyn EventSink,
        cancel: CancellationToken,
    ) -> Result<ResearchReport, ResearchError> {
        let mut state = ResearchState::new(task);
        let task_id = state.task_id();
        info!(%task_id, task, "Research started");

        match self.drive(&mut state, sink, &cancel).await {
            Ok(report) => {
                info!(%task_id, summary = %report.summary_line(), "Research finished");
                Ok(report)
            }
            Err(e) => {
                let failed_in = state.fail();
                warn!(
                    %task_id,
                    kind = e.kind(),
                    phase = %failed_in,
                    iterations = state.iteration_count,
                    facts = state.facts.len(),
                    error = %e,
                    "Research failed"
                );
                if !matches!(e, ResearchError::Transport(_)) {
                    // The subscriber may already be gone.
                    let _ = sink.emit(ResearchEvent::failed(&e, failed_in)).await;
                }
                Err(e)
            }
        }
    }

    /// Advance `state` stage by stage. A failed stage leaves `state` as it was
    /// before that stage began.
    async fn drive(
        &self,
        state: &mut ResearchState,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<ResearchReport, ResearchError> {
        let options = self.options;
        self.emit(
            sink,
            cancel,
            ResearchEvent::status(
                NodeName::System,
                json!({ "status": "starting", "task": state.task() }),
                "Starting research",
            ),
        )
        .await?;

        state.phase = if options.max_iterations == 0 {
            Phase::Writing
        } else {
            Phase::Planning
        };

        while !state.phase.is_terminal() {
            let phase = state.phase;
            let input = state.clone();
            *state = match phase {
                Phase::Planning => {
                    let mut next = self
                        .stage(
                            NodeName::Strategist,
                            self.strategist.run(input, options.max_iterations),
                            sink,
                            cancel,
                        )
                        .await?;
                    next.phase = if next.sufficient {
                        Phase::Writing
                    } else {
                        Phase::Searching
                    };
                    next
                }
                Phase::Searching => {
                    let mut next = self
                        .stage(NodeName::Hunter, self.hunter.run(input), sink, cancel)
                        .await?;
                    next.phase = Phase::Extracting;
                    next
                }
                Phase::Extracting => {
                    let mut next = self
                        .stage(NodeName::Curator, self.curator.run(input), sink, cancel)
                        .await?;
                    next.iteration_count += 1;
                    next.phase = match SearchRoute::after_round(&next, &options) {
                        SearchRoute::ContinueSearch => Phase::Planning,
                        SearchRoute::Advance => {
                            info!(
                                iterations = next.iteration_count,
                                facts = next.facts.len(),
                                "Search loop finished"
                            );
                            Phase::Writing
                        }
                    };
                    next
                }
                Phase::Writing => {
                    let mut next = self
                        .stage(NodeName::Analyst, self.analyst.run(input), sink, cancel)
                        .await?;
                    if options.max_critique_loops == 0 {
                        self.force_approve(&mut next, sink, cancel).await?;
                    } else {
                        next.phase = Phase::Reviewing;
                    }
                    next
                }
                Phase::Reviewing => {
                    let mut next = self
                        .stage(NodeName::Critic, self.critic.run(input), sink, cancel)
                        .await?;
                    if !next.approved {
                        next.critique_count += 1;
                    }
                    match ReviewRoute::after_review(&next, &options) {
                        ReviewRoute::Approve => next.phase = Phase::Done,
                        ReviewRoute::Revise => next.phase = Phase::Writing,
                        ReviewRoute::ForceApprove => {
                            self.force_approve(&mut next, sink, cancel).await?
                        }
                    }
                    next
                }
                Phase::Done | Phase::Error => input,
            };
        }

        let report = ResearchReport::from_state(state);
        self.emit(sink, cancel, ResearchEvent::report_complete(&report))
            .await?;
        self.emit(sink, cancel, ResearchEvent::complete()).await?;
        Ok(report)
    }

    async fn force_approve(
        &self,
        state: &mut ResearchState,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<(), ResearchError> {
        warn!(
            critique_count = state.critique_count,
            "Revision limit reached, releasing draft"
        );
        state.approved = true;
        state.forced_approval = true;
        state.phase = Phase::Done;
        self.emit(sink, cancel, ResearchEvent::forced_approval(state.critique_count))
            .await
    }

    /// Run one stage between its start and end events.
    async fn stage<F>(
        &self,
        node: NodeName,
        work: F,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<ResearchState, ResearchError>
    where
        F: Future<Output = StageResult>,
    {
        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }
        self.emit(sink, cancel, ResearchEvent::node_start(node)).await?;

        let (state, events) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
            result = work => result?,
        };

        for event in events {
            self.emit(sink, cancel, event).await?;
        }
        self.emit(sink, cancel, ResearchEvent::node_end(node)).await?;
        Ok(state)
    }

    async fn emit(
        &self,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
        event: ResearchEvent,
    ) -> Result<(), ResearchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResearchError::Cancelled),
            delivered = sink.emit(event) => delivered.map_err(ResearchError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::research::events::{EventType, RecordingSink};
    use crate::search::MockSearchProvider;

    fn options(max_iterations: usize, max_critique_loops: usize) -> ResearchOptions {
        ResearchOptions {
            max_iterations,
            max_critique_loops,
            max_queries_per_round: 3,
        }
    }

    #[test]
    fn test_search_route() {
        let opts = options(2, 3);
        let mut state = ResearchState::new("q");
        state.iteration_count = 1;
        assert_eq!(SearchRoute::after_round(&state, &opts), SearchRoute::ContinueSearch);
        state.iteration_count = 2;
        assert_eq!(SearchRoute::after_round(&state, &opts), SearchRoute::Advance);
        state.iteration_count = 1;
        state.sufficient = true;
        assert_eq!(SearchRoute::after_round(&state, &opts), SearchRoute::Advance);
    }

    #[test]
    fn test_review_route() {
        let opts = options(5, 2);
        let mut state = ResearchState::new("q");
        state.approved = true;
        assert_eq!(ReviewRoute::after_review(&state, &opts), ReviewRoute::Approve);
        state.approved = false;
        state.critique_count = 1;
        assert_eq!(ReviewRoute::after_review(&state, &opts), ReviewRoute::Revise);
        state.critique_count = 2;
        assert_eq!(ReviewRoute::after_review(&state, &opts), ReviewRoute::ForceApprove);
    }

    #[test]
    fn test_options_from_config() {
        let config = ResearchConfig {
            max_iterations: 2,
            max_critique_loops: 1,
            max_queries_per_round: 4,
        };
        assert_eq!(ResearchOptions::from(&config), ResearchOptions {
            max_iterations: 2,
            max_critique_loops: 1,
            max_queries_per_round: 4,
        });
        assert_eq!(ResearchOptions::default().max_iterations, 5);
    }

    #[tokio::test]
    async fn test_zero_bounds_skip_planning_and_review() {
        let llm = Arc::new(MockLlmProvider::new());
        let orchestrator = Orchestrator::new(
            Arc::new(Brain::single(llm.clone())),
            Arc::new(MockSearchProvider::new()),
            options(0, 0),
        );
        let sink = RecordingSink::new();
        let report = orchestrator
            .run("task", &sink, CancellationToken::new())
            .await
            .unwrap();

        assert!(llm.requests().is_empty());
        assert!(report.approved);
        assert!(report.forced_approval);
        assert_eq!(report.iterations, 0);
        assert_eq!(
            sink.event_types().await,
            vec![
                EventType::StatusUpdate,
                EventType::NodeStart,
                EventType::ReportChunk,
                EventType::NodeEnd,
                EventType::StatusUpdate,
                EventType::ReportComplete,
                EventType::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let orchestrator = Orchestrator::new(
            Arc::new(Brain::single(Arc::new(MockLlmProvider::new()))),
            Arc::new(MockSearchProvider::new()),
            ResearchOptions::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = RecordingSink::new();
        let err = orchestrator.run("task", &sink, cancel).await.unwrap_err();
        assert!(matches!(err, ResearchError::Cancelled));

        let events = sink.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["kind"], "cancelled");
    }
}
