//! Multi-agent smart city simulation.
//!
//! One entry-point task runs first; every other configured system then
//! reacts to its result, and the reactions are joined as a batch before
//! the closing summary.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use civic_core::{Envelope, DEFAULT_ROOM};
use civic_engine::{AgentExecutor, JoinMode};

use crate::{outcome_text, AgentRoster, WorkflowContext, WorkflowError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    AutonomousDriving,
    WeatherAlert,
    ParkingUpdate,
    SafetyInspection,
}

impl EntryPoint {
    pub const ALL: [EntryPoint; 4] = [
        Self::AutonomousDriving,
        Self::WeatherAlert,
        Self::ParkingUpdate,
        Self::SafetyInspection,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "autonomous_driving_task" => Some(Self::AutonomousDriving),
            "weather_alert_task" => Some(Self::WeatherAlert),
            "parking_update_task" => Some(Self::ParkingUpdate),
            "safety_inspection_task" => Some(Self::SafetyInspection),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutonomousDriving => "autonomous_driving_task",
            Self::WeatherAlert => "weather_alert_task",
            Self::ParkingUpdate => "parking_update_task",
            Self::SafetyInspection => "safety_inspection_task",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::AutonomousDriving => "Autonomous Driving System",
            Self::WeatherAlert => "Weather Monitoring System",
            Self::ParkingUpdate => "Parking Management System",
            Self::SafetyInspection => "Safety Inspection System",
        }
    }

    fn base_prompt(self) -> &'static str {
        match self {
            Self::AutonomousDriving => {
                "Analyze the current autonomous driving situation and draft an optimization strategy."
            }
            Self::WeatherAlert => {
                "Evaluate city safety risks under the current weather conditions."
            }
            Self::ParkingUpdate => {
                "Analyze parking conditions and optimize traffic flow."
            }
            Self::SafetyInspection => {
                "Run a safety inspection and assess potential risks."
            }
        }
    }

    fn executor(self, roster: &AgentRoster) -> Arc<dyn AgentExecutor> {
        match self {
            Self::AutonomousDriving => Arc::clone(&roster.traffic),
            Self::WeatherAlert => Arc::clone(&roster.weather),
            Self::ParkingUpdate => Arc::clone(&roster.parking),
            Self::SafetyInspection => Arc::clone(&roster.safety),
        }
    }
}

pub async fn run(
    ctx: &WorkflowContext,
    entry_point: &str,
    details: Map<String, Value>,
) -> Result<(), WorkflowError> {
    let ack = format!(
        "Starting smart city simulation with entry task '{entry_point}'. Spinning up the simulation..."
    );
    ctx.broadcast(json!({
        "type": "agent_message",
        "payload": ack,
        "title": "City Manager",
    }));
    ctx.history.record("Workflow acknowledgement", ack);

    let Some(entry) = EntryPoint::parse(entry_point) else {
        let message = format!("Invalid entry task: {entry_point}");
        tracing::warn!(entry_point, "rejecting simulation request");
        ctx.bus
            .publish_envelope(DEFAULT_ROOM, Envelope::error(&message));
        return Ok(());
    };

    // Initial task for the chosen entry point.
    let detail_text = details
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{}: {value}", key.replace('_', " "))
        })
        .collect::<Vec<_>>()
        .join(", ");
    let initial_prompt = format!(
        "Initial task: {}. Details: {detail_text}. {}",
        entry.title(),
        entry.base_prompt()
    );

    let tasks = ctx.tasks();
    let initial = tasks.spawn(
        &format!("{}_execution", entry.as_str()),
        initial_prompt,
        entry.executor(&ctx.roster),
    )?;

    ctx.broadcast(json!({
        "type": "agent_message",
        "payload": format!("Executing initial task: {}", entry.title()),
        "title": entry.title(),
    }));

    let results = tasks.join(&[initial.clone()], JoinMode::All).await?;
    let initial_text = results
        .get(&initial.label)
        .map(|outcome| outcome_text(outcome, "result"))
        .unwrap_or_default();

    ctx.broadcast(json!({
        "type": "agent_response",
        "payload": {
            "agent": entry.title(),
            "result": initial_text,
            "task": entry.as_str(),
        },
        "title": format!("{} complete", entry.title()),
    }));
    ctx.history
        .record(format!("{} result", entry.title()), initial_text.clone());

    // Every other system reacts to the initial result.
    let mut reactions = Vec::new();
    for target in EntryPoint::ALL.into_iter().filter(|t| *t != entry) {
        let handle = tasks.spawn(
            &format!("{}_reaction", target.as_str()),
            reaction_prompt(entry, target, &initial_text),
            target.executor(&ctx.roster),
        )?;
        reactions.push((target, handle));
    }

    ctx.broadcast(json!({
        "type": "agent_message",
        "payload": format!(
            "Triggering reactions from {} other systems...",
            reactions.len()
        ),
        "title": "Agent Coordinator",
    }));

    let handles: Vec<_> = reactions.iter().map(|(_, h)| h.clone()).collect();
    let results = tasks.join(&handles, JoinMode::All).await?;

    for (target, handle) in &reactions {
        let Some(outcome) = results.get(&handle.label) else {
            continue;
        };
        let text = outcome_text(outcome, "result");
        ctx.broadcast(json!({
            "type": "agent_response",
            "payload": {
                "agent": target.title(),
                "result": text,
                "triggered_by": entry.title(),
            },
            "title": format!("{} response complete", target.title()),
        }));
        ctx.history
            .record(format!("{} response", target.title()), text);
    }

    let summary = format!(
        "Smart city simulation complete. {} triggered {} agent responses; all interactions are finished.",
        entry.title(),
        reactions.len()
    );
    ctx.broadcast(json!({
        "type": "agent_message",
        "payload": summary,
        "title": "City Manager",
    }));
    ctx.history.record("Workflow complete", summary);
    Ok(())
}

fn reaction_prompt(source: EntryPoint, target: EntryPoint, initial: &str) -> String {
    use EntryPoint::*;
    match (source, target) {
        (AutonomousDriving, WeatherAlert) => format!(
            "Based on the autonomous driving result ({initial}), evaluate how weather conditions affect driving safety and issue any advisories."
        ),
        (AutonomousDriving, ParkingUpdate) => format!(
            "Based on the autonomous driving result ({initial}), analyze how parking conditions affect route planning and rebalance parking allocation."
        ),
        (AutonomousDriving, SafetyInspection) => format!(
            "Based on the autonomous driving result ({initial}), run a safety inspection to confirm the driving environment is safe."
        ),
        (WeatherAlert, AutonomousDriving) => format!(
            "Based on the weather alert result ({initial}), adjust the autonomous driving strategy for adverse weather."
        ),
        (WeatherAlert, ParkingUpdate) => format!(
            "Based on the weather alert result ({initial}), adapt parking management to the expected weather impact."
        ),
        (WeatherAlert, SafetyInspection) => format!(
            "Based on the weather alert result ({initial}), tighten safety inspections to keep the city safe in severe weather."
        ),
        (ParkingUpdate, AutonomousDriving) => format!(
            "Based on the parking update ({initial}), optimize autonomous driving routes to avoid congested areas."
        ),
        (ParkingUpdate, WeatherAlert) => format!(
            "Based on the parking update ({initial}), evaluate how the parking situation changes the weather response plan."
        ),
        (ParkingUpdate, SafetyInspection) => format!(
            "Based on the parking update ({initial}), inspect the safety of the affected parking areas."
        ),
        (SafetyInspection, AutonomousDriving) => format!(
            "Based on the safety inspection result ({initial}), adjust the autonomous driving strategy to stay within safe limits."
        ),
        (SafetyInspection, WeatherAlert) => format!(
            "Based on the safety inspection result ({initial}), assess how the identified risks interact with the weather response."
        ),
        (SafetyInspection, ParkingUpdate) => format!(
            "Based on the safety inspection result ({initial}), adjust parking management to address the findings."
        ),
        (source, target) => format!(
            "Based on the '{}' result ({initial}), {}",
            source.title(),
            target.base_prompt()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{context, context_with, drain_events};
    use civic_engine::mock::MockExecutor;

    #[tokio::test]
    async fn valid_entry_point_runs_initial_plus_reactions() {
        let (ctx, mut rx) = context();

        run(&ctx, "autonomous_driving_task", Map::new())
            .await
            .unwrap();

        let events = drain_events(&mut rx);
        let responses: Vec<_> = events
            .iter()
            .filter(|e| e.envelope.kind() == "agent_response")
            .collect();
        // 1 initial + 3 reactions, each with its own result entry.
        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0].envelope.payload()["task"], "autonomous_driving_task");
        for reaction in &responses[1..] {
            assert_eq!(
                reaction.envelope.payload()["triggered_by"],
                "Autonomous Driving System"
            );
        }

        // Ack, initial result, 3 reactions, completion.
        assert_eq!(ctx.history.len(), 6);
        // Everything was consumed by the joins.
        assert_eq!(ctx.scheduler.registered_count(), 0);
    }

    #[tokio::test]
    async fn every_entry_point_fans_out_to_the_others() {
        for entry in EntryPoint::ALL {
            let exec = Arc::new(MockExecutor::echoing());
            let (ctx, mut rx) = context_with(Arc::clone(&exec) as _);

            run(&ctx, entry.as_str(), Map::new()).await.unwrap();

            let events = drain_events(&mut rx);
            let responses = events
                .iter()
                .filter(|e| e.envelope.kind() == "agent_response")
                .count();
            assert_eq!(responses, EntryPoint::ALL.len());
            assert_eq!(exec.call_count(), EntryPoint::ALL.len());
        }
    }

    #[tokio::test]
    async fn invalid_entry_point_broadcasts_one_error_and_schedules_nothing() {
        let exec = Arc::new(MockExecutor::echoing());
        let (ctx, mut rx) = context_with(Arc::clone(&exec) as _);

        run(&ctx, "time_travel_task", Map::new()).await.unwrap();

        let events = drain_events(&mut rx);
        let errors: Vec<_> = events
            .iter()
            .filter(|e| e.envelope.kind() == "error")
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].envelope.payload(), "Invalid entry task: time_travel_task");

        assert_eq!(exec.call_count(), 0);
        assert_eq!(ctx.scheduler.registered_count(), 0);
    }

    #[tokio::test]
    async fn details_flow_into_the_initial_prompt() {
        let exec = Arc::new(MockExecutor::echoing());
        let (ctx, mut rx) = context_with(Arc::clone(&exec) as _);

        let mut details = Map::new();
        details.insert("road_segment".into(), serde_json::json!("ring road"));

        run(&ctx, "parking_update_task", details).await.unwrap();

        let events = drain_events(&mut rx);
        let initial = events
            .iter()
            .find(|e| e.envelope.kind() == "agent_response")
            .unwrap();
        // The echoing executor reflects the prompt back.
        let result = initial.envelope.payload()["result"].as_str().unwrap();
        assert!(result.contains("road segment: ring road"));
    }

    #[tokio::test]
    async fn reaction_failure_does_not_stop_the_summary() {
        // First call (initial task) succeeds, second fails, rest echo.
        let exec = Arc::new(MockExecutor::new(vec![
            civic_engine::mock::MockReply::text("initial ok"),
            civic_engine::mock::MockReply::Fail("reaction broke".into()),
        ]));
        let (ctx, mut rx) = context_with(exec as _);

        run(&ctx, "weather_alert_task", Map::new()).await.unwrap();

        let events = drain_events(&mut rx);
        let summary = events.last().unwrap();
        assert_eq!(summary.envelope.kind(), "agent_message");
        assert!(summary
            .envelope
            .payload()
            .as_str()
            .unwrap()
            .contains("simulation complete"));

        // The failed reaction still produced a response entry.
        let failed = events.iter().any(|e| {
            e.envelope.kind() == "agent_response"
                && e.envelope.payload()["result"]
                    .as_str()
                    .is_some_and(|s| s.contains("reaction broke"))
        });
        assert!(failed);
    }

    #[test]
    fn reaction_prompts_are_pairwise_specific() {
        let prompt = reaction_prompt(
            EntryPoint::ParkingUpdate,
            EntryPoint::SafetyInspection,
            "lot B full",
        );
        assert!(prompt.contains("lot B full"));
        assert!(prompt.contains("parking areas"));
    }
}
