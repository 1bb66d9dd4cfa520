//! City alert workflows: fire, traffic, weather.
//!
//! Each one broadcasts the raw event, runs its fixed-role tasks through a
//! join, and publishes the outcomes. The weather workflow additionally
//! chains into hazard workflows named by the event's secondary risks.

use serde_json::{json, Value};

use civic_engine::JoinMode;

use crate::{outcome_text, WorkflowContext, WorkflowError};

pub async fn fire_alert(ctx: &WorkflowContext, event: Value) -> Result<(), WorkflowError> {
    ctx.broadcast(json!({
        "type": "fire_alert",
        "title": "Fire Alert",
        "payload": event,
    }));

    let tasks = ctx.tasks();
    let safety = tasks.spawn(
        "safety_protocol_check",
        "Confirm all safety protocols are active for a fire emergency.",
        ctx.roster.safety.clone(),
    )?;
    let report = tasks.spawn(
        "fire_incident_report",
        format!("Generate a detailed report for the fire event: {event}"),
        ctx.roster.reporting.clone(),
    )?;

    let results = tasks.join(&[safety, report], JoinMode::All).await?;
    for label in ["safety_protocol_check", "fire_incident_report"] {
        if let Some(outcome) = results.get(label) {
            let text = outcome_text(outcome, "result");
            ctx.broadcast(json!({
                "type": "agent_response",
                "title": "Fire Response",
                "payload": { "agent": label, "result": text },
            }));
            ctx.history.record(label, text);
        }
    }
    Ok(())
}

pub async fn traffic_incident(ctx: &WorkflowContext, event: Value) -> Result<(), WorkflowError> {
    let location = event
        .get("location")
        .and_then(Value::as_str)
        .unwrap_or("an unreported location")
        .to_string();

    ctx.broadcast(json!({
        "type": "traffic_incident",
        "title": "Traffic Incident",
        "payload": event,
    }));

    let tasks = ctx.tasks();
    let reroute = tasks.spawn(
        "calculate_optimal_reroute",
        format!("Calculate optimal rerouting for the traffic incident at {location}."),
        ctx.roster.traffic.clone(),
    )?;

    let results = tasks.join(&[reroute.clone()], JoinMode::All).await?;
    if let Some(outcome) = results.get(&reroute.label) {
        let text = outcome_text(outcome, "result");
        ctx.broadcast(json!({
            "type": "agent_response",
            "title": "Traffic Response",
            "payload": { "agent": reroute.label, "result": text },
        }));
        ctx.history.record(reroute.label.clone(), text);
    }
    Ok(())
}

/// Weather alerts fan into hazard workflows: a `secondary_risks` entry of
/// `fire` or `traffic` runs the matching alert workflow inline, awaiting
/// its full sequence before continuing.
pub async fn weather_alert(ctx: &WorkflowContext, event: Value) -> Result<(), WorkflowError> {
    ctx.broadcast(json!({
        "type": "weather_alert",
        "title": "Weather Alert",
        "payload": event,
    }));

    let tasks = ctx.tasks();
    let assessment = tasks.spawn(
        "weather_risk_assessment",
        format!("Assess the city safety risks implied by the weather conditions: {event}"),
        ctx.roster.weather.clone(),
    )?;

    let results = tasks.join(&[assessment.clone()], JoinMode::All).await?;
    if let Some(outcome) = results.get(&assessment.label) {
        let text = outcome_text(outcome, "result");
        ctx.broadcast(json!({
            "type": "agent_response",
            "title": "Weather Assessment",
            "payload": { "agent": assessment.label, "result": text },
        }));
        ctx.history.record(assessment.label.clone(), text);
    }

    let area = event
        .get("area")
        .and_then(Value::as_str)
        .unwrap_or("the affected area")
        .to_string();
    let risks: Vec<String> = event
        .get("secondary_risks")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    for risk in risks {
        match risk.as_str() {
            "fire" => {
                fire_alert(
                    ctx,
                    json!({
                        "location": area,
                        "details": "Secondary fire risk due to weather conditions.",
                    }),
                )
                .await?;
            }
            "traffic" => {
                traffic_incident(
                    ctx,
                    json!({
                        "location": area,
                        "details": "Secondary traffic disruption due to weather conditions.",
                    }),
                )
                .await?;
            }
            other => {
                tracing::warn!(risk = other, "no hazard workflow for secondary risk");
            }
        }
    }
    Ok(())
}
