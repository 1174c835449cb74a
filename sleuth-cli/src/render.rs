//! Terminal rendering of research progress events.

use sleuth_core::research::{EventType, ResearchEvent};

/// One progress line for an event, or `None` for events not shown live.
pub fn progress_line(event: &ResearchEvent) -> Option<String> {
    let node = event.node.map(|n| n.as_str()).unwrap_or("system");
    let data = &event.data;
    match event.event_type {
        EventType::NodeStart => Some(format!("▶ {}", node)),
        EventType::NodeEnd | EventType::ReportChunk | EventType::Complete => None,
        EventType::QueriesGenerated => {
            let queries: Vec<&str> = data["queries"]
                .as_array()
                .map(|qs| qs.iter().filter_map(|q| q.as_str()).collect())
                .unwrap_or_default();
            Some(format!("  queries: {}", queries.join(" | ")))
        }
        EventType::FactsExtracted => Some(format!(
            "  facts: +{} ({} total)",
            data["new_facts_count"], data["total_facts"]
        )),
        EventType::StatusUpdate => {
            if data["forced_approval"] == true {
                Some(format!(
                    "  ⚠ revision limit reached after {} critiques, releasing report",
                    data["critique_count"]
                ))
            } else if let Some(approved) = data["approved"].as_bool() {
                if approved {
                    Some("  ✓ approved".to_string())
                } else {
                    Some(format!(
                        "  ✗ revision requested: {}",
                        data["feedback"].as_str().unwrap_or_default()
                    ))
                }
            } else {
                event.message.as_ref().map(|m| format!("  {}", m))
            }
        }
        EventType::Error => {
            let label = if data["fatal"] == true { "error" } else { "warning" };
            Some(format!(
                "  {} [{}]: {}",
                label,
                data["kind"].as_str().unwrap_or("unknown"),
                data["error"].as_str().unwrap_or_default()
            ))
        }
        EventType::ReportComplete => Some(format!(
            "✔ done: {} facts, {} sources, {} rounds",
            data["facts_count"], data["sources_count"], data["iterations"]
        )),
    }
}
