//! Integration tests for the research pipeline.
//!
//! These tests drive the full orchestrator end-to-end with MockLlmProvider and
//! MockSearchProvider, checking loop bounds, deduplication, error handling and
//! the event stream a subscriber sees.

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use sleuth_core::brain::{Brain, MockLlmProvider};
use sleuth_core::error::{LlmError, ResearchError};
use sleuth_core::research::{
    EventType, FactId, NodeName, Orchestrator, RecordingSink, ResearchEvent, ResearchOptions,
};
use sleuth_core::search::{MockMode, MockSearchProvider, RawSearchResult};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    reasoning: Arc<MockLlmProvider>,
    fast: Arc<MockLlmProvider>,
    search: Arc<MockSearchProvider>,
}

impl Harness {
    fn new(search: MockSearchProvider) -> Self {
        Self {
            reasoning: Arc::new(MockLlmProvider::new()),
            fast: Arc::new(MockLlmProvider::new()),
            search: Arc::new(search),
        }
    }

    fn orchestrator(&self, max_iterations: usize, max_critique_loops: usize) -> Orchestrator {
        Orchestrator::new(
            Arc::new(Brain::new(self.reasoning.clone(), self.fast.clone())),
            self.search.clone(),
            ResearchOptions {
                max_iterations,
                max_critique_loops,
                max_queries_per_round: 3,
            },
        )
    }

    fn plan(&self, queries: &[&str]) {
        self.reasoning
            .queue_json(json!({ "search_queries": queries, "is_complete": false }));
    }

    fn plan_complete(&self) {
        self.reasoning
            .queue_json(json!({ "search_queries": [], "is_complete": true }));
    }

    fn facts(&self, facts: &[&str]) {
        self.fast
            .queue_json(json!({ "facts": facts, "is_relevant": true }));
    }

    fn review(&self, approved: bool, feedback: &str) {
        self.reasoning
            .queue_json(json!({ "approved": approved, "feedback": feedback }));
    }
}

fn result(url: &str, content: &str) -> RawSearchResult {
    RawSearchResult::new("result", content, url, 0.9)
}

fn count(events: &[ResearchEvent], event_type: EventType) -> usize {
    events.iter().filter(|e| e.event_type == event_type).count()
}

#[tokio::test]
async fn test_capital_of_france() {
    let h = Harness::new(MockSearchProvider::with_mode(MockMode::Empty));
    h.search.set_results(
        "capital of France",
        vec![result("https://example.org/france", "Paris is the capital of France.")],
    );
    h.plan(&["capital of France"]);
    h.facts(&["Paris is the capital of France."]);
    h.plan_complete();
    h.reasoning.queue_text("# France\n\nParis is the capital of France [1].");
    h.review(true, "");

    let sink = RecordingSink::new();
    let report = h
        .orchestrator(5, 3)
        .run("What is the capital of France?", &sink, CancellationToken::new())
        .await
        .unwrap();

    let events = sink.events().await;
    let extracted: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EventType::FactsExtracted)
        .collect();
    assert_eq!(extracted.len(), 1);
    assert_eq!(extracted[0].data["new_facts_count"], 1);
    assert_eq!(extracted[0].data["total_facts"], 1);
    assert_eq!(count(&events, EventType::Complete), 1);
    assert_eq!(count(&events, EventType::Error), 0);

    assert!(report.approved);
    assert!(!report.forced_approval);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.facts_count, 1);
    assert_eq!(report.sources_count, 1);
    assert_eq!(report.citations.len(), 1);
    assert_eq!(
        report.citations[0].fact_id,
        FactId::for_text("Paris is the capital of France.")
    );
    assert!(report.report.contains("## Sources\n\n[1] https://example.org/france"));
    assert_eq!(h.reasoning.pending(), 0);
    assert_eq!(h.fast.pending(), 0);
}

#[tokio::test]
async fn test_event_stream_shape() {
    let h = Harness::new(MockSearchProvider::new());
    h.plan(&["rust ownership"]);
    h.facts(&["Rust enforces ownership at compile time."]);
    h.plan_complete();
    h.reasoning.queue_text("Ownership is checked at compile time [1].");
    h.review(true, "");

    let sink = RecordingSink::new();
    h.orchestrator(5, 3)
        .run("How does Rust ownership work?", &sink, CancellationToken::new())
        .await
        .unwrap();
    let events = sink.events().await;

    let first = &events[0];
    assert_eq!(first.event_type, EventType::StatusUpdate);
    assert_eq!(first.data["status"], "starting");

    let n = events.len();
    assert_eq!(events[n - 2].event_type, EventType::ReportComplete);
    assert_eq!(events[n - 1].event_type, EventType::Complete);
    assert_eq!(events[n - 1].data["status"], "complete");
    assert_eq!(events[n - 2].data["facts_count"], 1);

    // Every stage is bracketed by start/end for the same node.
    let mut open: Option<NodeName> = None;
    for event in &events {
        match event.event_type {
            EventType::NodeStart => {
                assert!(open.is_none(), "nested node_start");
                open = event.node;
            }
            EventType::NodeEnd => {
                assert_eq!(open.take(), event.node);
            }
            _ => {}
        }
    }
    assert!(open.is_none());

    let nodes: Vec<NodeName> = events
        .iter()
        .filter(|e| e.event_type == EventType::NodeStart)
        .filter_map(|e| e.node)
        .collect();
    assert_eq!(
        nodes,
        vec![
            NodeName::Strategist,
            NodeName::Hunter,
            NodeName::Curator,
            NodeName::Strategist,
            NodeName::Analyst,
            NodeName::Critic,
        ]
    );
}

#[tokio::test]
async fn test_all_searches_fail() {
    let h = Harness::new(MockSearchProvider::failing());
    h.plan(&["first angle", "second angle"]);
    h.plan(&["third angle"]);
    h.review(true, "");

    let sink = RecordingSink::new();
    let report = h
        .orchestrator(2, 3)
        .run("An unsearchable question", &sink, CancellationToken::new())
        .await
        .unwrap();

    let events = sink.events().await;
    assert_eq!(events.last().unwrap().event_type, EventType::Complete);
    let errors: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EventType::Error)
        .collect();
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|e| e.data["fatal"] == false));
    assert!(errors.iter().all(|e| e.data["kind"] == "search_error"));

    assert_eq!(report.iterations, 2);
    assert_eq!(report.facts_count, 0);
    assert!(report.report.contains("No facts were discovered"));
    // The writer does not consult the model without facts.
    assert!(h.fast.requests().is_empty());
    assert_eq!(h.reasoning.requests().len(), 3);
}

#[tokio::test]
async fn test_critique_loop_is_bounded() {
    let h = Harness::new(MockSearchProvider::new());
    h.plan(&["vaccine history"]);
    h.facts(&["Edward Jenner developed the smallpox vaccine in 1796."]);
    h.plan_complete();
    h.reasoning.queue_text("Draft one.");
    h.review(false, "Cite the vaccine claim with [1].");
    h.reasoning.queue_text("Draft two [1].");
    h.review(false, "Still too thin.");

    let sink = RecordingSink::new();
    let report = h
        .orchestrator(5, 2)
        .run("Who invented vaccines?", &sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.critique_count, 2);
    assert!(report.approved);
    assert!(report.forced_approval);
    assert!(report.report.starts_with("Draft two [1]."));

    let events = sink.events().await;
    let forced = events
        .iter()
        .position(|e| e.event_type == EventType::StatusUpdate && e.data["forced_approval"] == true)
        .expect("forced approval warning");
    let complete = events
        .iter()
        .position(|e| e.event_type == EventType::Complete)
        .unwrap();
    assert!(forced < complete);
    assert_eq!(count(&events, EventType::ReportChunk), 2);

    // The revision prompt carries the reviewer's feedback verbatim.
    let requests = h.reasoning.requests();
    let revision_prompt = &requests[4].messages[1].content;
    assert!(revision_prompt.contains("CRITICAL FEEDBACK FROM PREVIOUS DRAFT:\nCite the vaccine claim with [1]."));
}

#[tokio::test]
async fn test_duplicate_facts_across_sources() {
    let h = Harness::new(MockSearchProvider::with_mode(MockMode::Empty));
    h.search.set_results(
        "boiling point of water",
        vec![
            result("https://first.test/water", "Water boils at 100 C at sea level."),
            result("https://second.test/water", "At sea level water boils at 100 C."),
        ],
    );
    h.plan(&["boiling point of water"]);
    h.facts(&["Water boils at 100 C at sea level."]);
    h.facts(&["water boils at 100 C  at sea level."]);
    h.plan_complete();
    h.reasoning.queue_text("Water boils at 100 C at sea level [1].");
    h.review(true, "");

    let sink = RecordingSink::new();
    let report = h
        .orchestrator(5, 3)
        .run("At what temperature does water boil?", &sink, CancellationToken::new())
        .await
        .unwrap();

    let extracted = sink.of_type(EventType::FactsExtracted).await;
    assert_eq!(extracted[0].data["new_facts_count"], 1);
    assert_eq!(extracted[0].data["total_facts"], 1);
    assert_eq!(report.facts_count, 1);
    assert_eq!(report.citations[0].source, "https://first.test/water");
}

#[tokio::test]
async fn test_iteration_bound() {
    let h = Harness::new(MockSearchProvider::new());
    h.plan(&["round one"]);
    h.plan(&["round two"]);
    h.plan(&["round three"]);
    h.reasoning.queue_text("Report [1] [2].");
    h.review(true, "");
    h.fast
        .set_fallback(r#"{"facts": ["A recurring fact."], "is_relevant": true}"#);

    let sink = RecordingSink::new();
    let report = h
        .orchestrator(3, 3)
        .run("A question that is never answered", &sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.iterations, 3);
    assert_eq!(report.facts_count, 1);
    // [2] does not resolve and is stripped from the delivered report.
    assert!(!report.report.contains("[2]"));
    let events = sink.events().await;
    assert_eq!(count(&events, EventType::QueriesGenerated), 3);
    assert_eq!(count(&events, EventType::FactsExtracted), 3);
    assert_eq!(h.search.calls(), vec!["round one", "round two", "round three"]);
}

#[tokio::test]
async fn test_planning_failure_is_fatal() {
    let h = Harness::new(MockSearchProvider::new());
    h.reasoning.queue_error(LlmError::AuthFailed {
        provider: "mock".into(),
    });

    let sink = RecordingSink::new();
    let err = h
        .orchestrator(5, 3)
        .run("Any question at all", &sink, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ResearchError::Planning { .. }));

    let events = sink.events().await;
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert_eq!(last.data["kind"], "planning_error");
    assert_eq!(last.data["fatal"], true);
    assert_eq!(last.data["phase"], "planning");
    assert_eq!(count(&events, EventType::Complete), 0);
    assert_eq!(count(&events, EventType::Error), 1);
    assert!(h.search.calls().is_empty());
}

#[tokio::test]
async fn test_plan_with_wrong_shape_is_fatal() {
    let h = Harness::new(MockSearchProvider::new());
    h.reasoning.queue_json(json!({ "plan": ["capital of France"] }));
    h.review(true, "");

    let sink = RecordingSink::new();
    let err = h
        .orchestrator(5, 3)
        .run("What is the capital of France?", &sink, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ResearchError::Planning { .. }));

    let events = sink.events().await;
    assert_eq!(count(&events, EventType::ReportComplete), 0);
    assert_eq!(count(&events, EventType::Complete), 0);
    assert_eq!(events.last().unwrap().data["kind"], "planning_error");
    assert!(h.search.calls().is_empty());
    assert_eq!(h.reasoning.pending(), 1);
}

#[tokio::test]
async fn test_synthesis_failure_is_fatal() {
    let h = Harness::new(MockSearchProvider::new());
    h.plan(&["q"]);
    h.facts(&["Some fact."]);
    h.plan_complete();
    h.reasoning.queue_error(LlmError::ApiRequest {
        message: "context length exceeded".into(),
    });

    let sink = RecordingSink::new();
    let err = h
        .orchestrator(5, 3)
        .run("Any question at all", &sink, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "synthesis_error");

    let events = sink.events().await;
    assert_eq!(events.last().unwrap().data["kind"], "synthesis_error");
    assert_eq!(events.last().unwrap().data["phase"], "writing");
    assert_eq!(count(&events, EventType::ReportComplete), 0);
}

#[tokio::test]
async fn test_review_failure_fails_open() {
    let h = Harness::new(MockSearchProvider::new());
    h.plan_complete();
    h.reasoning.queue_error(LlmError::ApiRequest {
        message: "bad gateway".into(),
    });

    let sink = RecordingSink::new();
    let report = h
        .orchestrator(5, 3)
        .run("Any question at all", &sink, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.approved);
    assert!(!report.forced_approval);
    assert_eq!(report.iterations, 0);
    let errors = sink.of_type(EventType::Error).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].data["kind"], "review_error");
    assert_eq!(errors[0].data["fatal"], false);
}

#[tokio::test]
async fn test_transport_failure_stops_emission() {
    let h = Harness::new(MockSearchProvider::new());
    h.plan(&["q"]);

    let sink = RecordingSink::failing_after(3);
    let err = h
        .orchestrator(5, 3)
        .run("Any question at all", &sink, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "transport_error");
    assert_eq!(sink.events().await.len(), 3);
}

#[tokio::test]
async fn test_cancellation_mid_search() {
    let h = Harness::new(MockSearchProvider::new().with_delay(Duration::from_secs(30)));
    h.plan(&["slow query"]);

    let orchestrator = Arc::new(h.orchestrator(5, 3));
    let mut handle = orchestrator.spawn("A question with slow searches");

    while let Some(event) = handle.events.next().await {
        if event.event_type == EventType::NodeStart && event.node == Some(NodeName::Hunter) {
            break;
        }
    }
    handle.cancel.cancel();

    let rest: Vec<ResearchEvent> = tokio::time::timeout(
        Duration::from_secs(5),
        handle.events.collect::<Vec<_>>(),
    )
    .await
    .expect("event stream ends after cancellation");

    let result = handle.join.await.unwrap();
    assert!(matches!(result, Err(ResearchError::Cancelled)));

    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].event_type, EventType::Error);
    assert_eq!(rest[0].data["kind"], "cancelled");
    assert!(h.fast.requests().is_empty());
}
