//! Interaction report synthesis.
//!
//! Summarizes the caller's events (or the five most recent history
//! entries) through one synthesis task and broadcasts the result.

use serde_json::{json, Value};

use civic_engine::JoinMode;

use crate::{value_text, WorkflowContext, WorkflowError};

const WINDOW: usize = 5;

pub async fn generate_report(
    ctx: &WorkflowContext,
    events: Option<Vec<Value>>,
) -> Result<(), WorkflowError> {
    ctx.broadcast(json!({
        "type": "agent_message",
        "payload": "Generating a city analysis report from the most recent interactions...",
        "title": "Report Generator",
    }));

    let lines: Vec<String> = match events {
        Some(events) => {
            let start = events.len().saturating_sub(WINDOW);
            events[start..]
                .iter()
                .enumerate()
                .map(|(i, event)| event_line(i + 1, event))
                .collect()
        }
        None => ctx
            .history
            .tail(WINDOW)
            .iter()
            .enumerate()
            .map(|(i, entry)| format!("{}. {}: {}", i + 1, entry.label, entry.content))
            .collect(),
    };

    if lines.is_empty() {
        ctx.broadcast(json!({
            "type": "analysis_report",
            "payload": { "report": "No interaction records yet; nothing to report." },
            "title": "City Analysis Report",
        }));
        return Ok(());
    }

    let mut prompt = String::from(
        "Based on the following smart city interaction records, produce a concise \
         analysis report covering key findings, trends, and recommendations:\n\n",
    );
    for line in &lines {
        prompt.push_str(line);
        prompt.push('\n');
    }

    let tasks = ctx.tasks();
    let synthesis = tasks.spawn("city_analysis_report", prompt, ctx.roster.reporting.clone())?;
    let results = tasks.join(&[synthesis.clone()], JoinMode::All).await?;

    let content = match results.get(&synthesis.label) {
        Some(Ok(value)) => value_text(value, "report"),
        _ => "Report generation failed.".to_string(),
    };
    ctx.broadcast(json!({
        "type": "analysis_report",
        "payload": { "report": content },
        "title": "City Analysis Report",
    }));
    Ok(())
}

/// Render one interaction record for the synthesis prompt. Broadcast-shaped
/// events, history-shaped records and free-form values each read naturally.
fn event_line(i: usize, event: &Value) -> String {
    if let Value::Object(map) = event {
        if map.contains_key("type") && map.contains_key("payload") {
            let kind = map.get("type").and_then(Value::as_str).unwrap_or("");
            let title = map.get("title").and_then(Value::as_str).unwrap_or("Untitled");
            let payload = map.get("payload").cloned().unwrap_or(Value::Null);
            return match kind {
                "agent_response" => {
                    let agent = payload
                        .get("agent")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown agent");
                    let result = payload
                        .get("result")
                        .map(|v| value_text(v, "result"))
                        .unwrap_or_else(|| "no result".to_string());
                    format!("{i}. {agent} responded: {result}")
                }
                "agent_message" => {
                    let message = match &payload {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    format!("{i}. {title}: {message}")
                }
                _ => format!("{i}. {title}: {payload}"),
            };
        }
        if let (Some(label), Some(content)) = (
            map.get("label").and_then(Value::as_str),
            map.get("content").and_then(Value::as_str),
        ) {
            return format!("{i}. {label}: {content}");
        }
    }
    format!("{i}. {event}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{context, context_with, drain_events};
    use civic_engine::mock::MockExecutor;
    use serde_json::json;
    use std::sync::Arc;

    fn report_events(events: &[civic_core::RoomEvent]) -> Vec<&civic_core::RoomEvent> {
        events
            .iter()
            .filter(|e| e.envelope.kind() == "analysis_report")
            .collect()
    }

    #[tokio::test]
    async fn empty_history_yields_no_data_report() {
        let exec = Arc::new(MockExecutor::echoing());
        let (ctx, mut rx) = context_with(Arc::clone(&exec) as _);

        generate_report(&ctx, None).await.unwrap();

        let events = drain_events(&mut rx);
        let reports = report_events(&events);
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].envelope.payload()["report"],
            "No interaction records yet; nothing to report."
        );
        // No synthesis task was scheduled.
        assert_eq!(exec.call_count(), 0);
    }

    #[tokio::test]
    async fn uses_last_five_history_entries() {
        let (ctx, mut rx) = context();
        for i in 0..8 {
            ctx.history.record(format!("event {i}"), format!("detail {i}"));
        }

        generate_report(&ctx, None).await.unwrap();

        let events = drain_events(&mut rx);
        let report = report_events(&events)[0];
        let text = report.envelope.payload()["report"].as_str().unwrap();
        // The echoing executor reflects the prompt: entries 3..=7 only.
        assert!(!text.contains("event 2"));
        assert!(text.contains("event 3"));
        assert!(text.contains("event 7"));
    }

    #[tokio::test]
    async fn short_history_uses_everything() {
        let (ctx, mut rx) = context();
        ctx.history.record("only event", "only detail");

        generate_report(&ctx, None).await.unwrap();

        let events = drain_events(&mut rx);
        let text = report_events(&events)[0].envelope.payload()["report"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(text.contains("1. only event: only detail"));
    }

    #[tokio::test]
    async fn supplied_events_take_precedence_over_history() {
        let (ctx, mut rx) = context();
        ctx.history.record("history event", "should not appear");

        let supplied = vec![
            json!({
                "type": "agent_response",
                "title": "Weather Monitoring System",
                "payload": { "agent": "Weather Monitoring System", "result": "storm incoming" },
            }),
            json!({
                "type": "agent_message",
                "title": "City Manager",
                "payload": "simulation started",
            }),
            json!({ "label": "stored", "content": "from a prior run" }),
            json!("free-form note"),
        ];
        generate_report(&ctx, Some(supplied)).await.unwrap();

        let events = drain_events(&mut rx);
        let text = report_events(&events)[0].envelope.payload()["report"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(text.contains("Weather Monitoring System responded: storm incoming"));
        assert!(text.contains("City Manager: simulation started"));
        assert!(text.contains("stored: from a prior run"));
        assert!(text.contains("free-form note"));
        assert!(!text.contains("should not appear"));
    }

    #[tokio::test]
    async fn supplied_events_are_windowed_to_five() {
        let (ctx, mut rx) = context();
        let supplied: Vec<Value> = (0..9).map(|i| json!(format!("note {i}"))).collect();

        generate_report(&ctx, Some(supplied)).await.unwrap();

        let events = drain_events(&mut rx);
        let text = report_events(&events)[0].envelope.payload()["report"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(!text.contains("note 3"));
        assert!(text.contains("note 4"));
        assert!(text.contains("note 8"));
    }

    #[tokio::test]
    async fn failed_synthesis_reports_fallback() {
        let (ctx, mut rx) = context_with(Arc::new(MockExecutor::failing("overloaded")) as _);
        ctx.history.record("something", "happened");

        generate_report(&ctx, None).await.unwrap();

        let events = drain_events(&mut rx);
        assert_eq!(
            report_events(&events)[0].envelope.payload()["report"],
            "Report generation failed."
        );
    }

    #[test]
    fn event_line_shapes() {
        let response = json!({
            "type": "agent_response",
            "payload": { "agent": "Safety Inspection System", "result": "all clear" },
        });
        assert_eq!(
            event_line(1, &response),
            "1. Safety Inspection System responded: all clear"
        );

        let other = json!({ "type": "fire_alert", "title": "Fire Alert", "payload": { "location": "pier" } });
        assert_eq!(event_line(2, &other), r#"2. Fire Alert: {"location":"pier"}"#);

        assert_eq!(event_line(3, &json!(12)), "3. 12");
    }
}
