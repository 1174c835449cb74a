//! Progress events and the sinks that carry them.
//!
//! Every task produces a totally ordered stream of [`ResearchEvent`]s. The
//! orchestrator awaits each `emit`, so a sink observes events in causal order.

use super::output::ResearchReport;
use super::state::Phase;
use super::truncate_chars;
use crate::error::{ResearchError, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};

/// Maximum characters of reviewer feedback carried in an event.
pub const FEEDBACK_PREVIEW_CHARS: usize = 200;

/// Kind of progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NodeStart,
    NodeEnd,
    QueriesGenerated,
    FactsExtracted,
    ReportChunk,
    ReportComplete,
    StatusUpdate,
    Error,
    Complete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NodeStart => "node_start",
            EventType::NodeEnd => "node_end",
            EventType::QueriesGenerated => "queries_generated",
            EventType::FactsExtracted => "facts_extracted",
            EventType::ReportChunk => "report_chunk",
            EventType::ReportComplete => "report_complete",
            EventType::StatusUpdate => "status_update",
            EventType::Error => "error",
            EventType::Complete => "complete",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeName {
    Strategist,
    Hunter,
    Curator,
    Analyst,
    Critic,
    System,
}

impl NodeName {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeName::Strategist => "strategist",
            NodeName::Hunter => "hunter",
            NodeName::Curator => "curator",
            NodeName::Analyst => "analyst",
            NodeName::Critic => "critic",
            NodeName::System => "system",
        }
    }
}

impl std::fmt::Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchEvent {
    pub event_type: EventType,
    pub node: Option<NodeName>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ResearchEvent {
    pub fn new(event_type: EventType, node: Option<NodeName>, data: Value) -> Self {
        Self {
            event_type,
            node,
            data,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn node_start(node: NodeName) -> Self {
        Self::new(EventType::NodeStart, Some(node), json!({}))
            .with_message(format!("{} started", node))
    }

    pub fn node_end(node: NodeName) -> Self {
        Self::new(EventType::NodeEnd, Some(node), json!({}))
            .with_message(format!("{} finished", node))
    }

    pub fn queries_generated(queries: &[String]) -> Self {
        Self::new(
            EventType::QueriesGenerated,
            Some(NodeName::Strategist),
            json!({ "queries": queries }),
        )
        .with_message(format!("Generated {} search queries", queries.len()))
    }

    pub fn facts_extracted(new_facts_count: usize, total_facts: usize) -> Self {
        Self::new(
            EventType::FactsExtracted,
            Some(NodeName::Curator),
            json!({ "new_facts_count": new_facts_count, "total_facts": total_facts }),
        )
        .with_message(format!(
            "Extracted {} new facts ({} total)",
            new_facts_count, total_facts
        ))
    }

    pub fn report_chunk(content: &str) -> Self {
        Self::new(
            EventType::ReportChunk,
            Some(NodeName::Analyst),
            json!({ "content": content }),
        )
    }

    pub fn report_complete(report: &ResearchReport) -> Self {
        Self::new(
            EventType::ReportComplete,
            Some(NodeName::System),
            json!({
                "report": report.report,
                "sources_count": report.sources_count,
                "facts_count": report.facts_count,
                "iterations": report.iterations,
                "critique_count": report.critique_count,
                "approved": report.approved,
                "forced_approval": report.forced_approval,
            }),
        )
        .with_message("Research complete")
    }

    pub fn status(node: NodeName, data: Value, message: impl Into<String>) -> Self {
        Self::new(EventType::StatusUpdate, Some(node), data).with_message(message)
    }

    /// The reviewer's verdict, feedback cut to a preview.
    pub fn review_verdict(approved: bool, feedback: &str) -> Self {
        let message = if approved {
            "Report approved"
        } else {
            "Report needs revision"
        };
        Self::status(
            NodeName::Critic,
            json!({
                "approved": approved,
                "feedback": truncate_chars(feedback, FEEDBACK_PREVIEW_CHARS),
            }),
            message,
        )
    }

    pub fn forced_approval(critique_count: usize) -> Self {
        Self::status(
            NodeName::Critic,
            json!({ "forced_approval": true, "critique_count": critique_count }),
            format!(
                "Revision limit reached after {} critiques; releasing report unapproved by review",
                critique_count
            ),
        )
    }

    pub fn error(node: Option<NodeName>, error: &ResearchError) -> Self {
        Self::new(
            EventType::Error,
            node,
            json!({
                "kind": error.kind(),
                "error": error.to_string(),
                "fatal": error.is_fatal(),
            }),
        )
        .with_message(error.to_string())
    }

    /// Terminal error for a task that failed while in `phase`.
    pub fn failed(error: &ResearchError, phase: Phase) -> Self {
        let mut event = Self::error(Some(NodeName::System), error);
        event.data["phase"] = json!(phase.to_string());
        event
    }

    pub fn complete() -> Self {
        Self::new(
            EventType::Complete,
            Some(NodeName::System),
            json!({ "status": "complete" }),
        )
    }

    /// Render as a server-sent event frame.
    pub fn to_sse(&self) -> String {
        let payload = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("event: {}\ndata: {}\n\n", self.event_type, payload)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.event_type, EventType::Complete)
            || (self.event_type == EventType::Error
                && self.data.get("fatal").and_then(Value::as_bool) == Some(true))
    }
}

/// Destination for a task's events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. An error means the subscriber is gone.
    async fn emit(&self, event: ResearchEvent) -> Result<(), TransportError>;
}

/// Forwards events into a bounded tokio channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ResearchEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ResearchEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiving half of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ResearchEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: ResearchEvent) -> Result<(), TransportError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Collects events in memory; optionally fails after a number of deliveries.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ResearchEvent>>,
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that accepts `n` events and then reports a disconnect.
    pub fn failing_after(n: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_after: Some(n),
        }
    }

    pub async fn events(&self) -> Vec<ResearchEvent> {
        self.events.lock().await.clone()
    }

    pub async fn event_types(&self) -> Vec<EventType> {
        self.events
            .lock()
            .await
            .iter()
            .map(|e| e.event_type)
            .collect()
    }

    pub async fn of_type(&self, event_type: EventType) -> Vec<ResearchEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: ResearchEvent) -> Result<(), TransportError> {
        let mut events = self.events.lock().await;
        if self.fail_after.is_some_and(|n| events.len() >= n) {
            return Err(TransportError::Disconnected);
        }
        events.push(event);
        Ok(())
    }
}
