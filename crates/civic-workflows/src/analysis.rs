//! Staged city analysis: plan, collect, report. Each stage joins before
//! the next one starts and announces its progress to the room.

use serde_json::json;

use civic_engine::JoinMode;

use crate::{value_text, WorkflowContext, WorkflowError};

pub async fn city_analysis(ctx: &WorkflowContext, city: &str) -> Result<(), WorkflowError> {
    ctx.broadcast(json!({
        "type": "agent_message",
        "payload": format!("Starting analysis for {city}..."),
        "title": "City Analysis Workflow",
    }));

    let tasks = ctx.tasks();

    let plan = tasks.spawn(
        "create_analysis_plan",
        format!("Create a plan to analyze the city of {city}."),
        ctx.roster.planning.clone(),
    )?;
    tasks.join(&[plan], JoinMode::All).await?;

    ctx.broadcast(json!({
        "type": "agent_message",
        "payload": format!("Plan created. Collecting data for {city}..."),
        "title": "City Analysis Workflow",
    }));

    let collect = tasks.spawn(
        "collect_city_data",
        format!("Collect relevant data for the city of {city}."),
        ctx.roster.data_collection.clone(),
    )?;
    tasks.join(&[collect], JoinMode::All).await?;

    ctx.broadcast(json!({
        "type": "agent_message",
        "payload": format!("Data collected. Generating report for {city}..."),
        "title": "City Analysis Workflow",
    }));

    let report = tasks.spawn(
        "generate_city_report",
        format!("Generate a comprehensive analysis report for {city} based on the collected data."),
        ctx.roster.reporting.clone(),
    )?;
    let results = tasks.join(&[report.clone()], JoinMode::All).await?;

    let content = match results.get(&report.label) {
        Some(Ok(value)) => value_text(value, "report"),
        _ => "Failed to generate report.".to_string(),
    };
    ctx.broadcast(json!({
        "type": "analysis_report",
        "payload": { "report": content },
        "title": "City Analysis Report",
    }));
    ctx.history.record("City analysis report", content);
    Ok(())
}
