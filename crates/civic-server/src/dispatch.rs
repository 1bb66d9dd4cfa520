//! Inbound message dispatch.
//!
//! Frames arrive as `{"type": <selector>, "data": {...}}` and deserialize
//! into the closed [`ClientRequest`] enum, so the supported-workflow set is
//! checked by the compiler rather than a runtime string chain. Anything
//! that fails to parse, whether malformed JSON or an unknown selector, is
//! and dropped without a reply.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use civic_core::ids::{ConnectionId, WorkflowId};
use civic_workflows::{report, simulation, WorkflowContext, WorkflowRegistry};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    SmartCitySimulation {
        #[serde(default)]
        data: SimulationRequest,
    },
    GenerateReport {
        #[serde(default)]
        data: Option<ReportRequest>,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct SimulationRequest {
    pub entry_point: Option<String>,
    /// Everything else in `data` feeds the initial task prompt.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportRequest {
    pub events: Option<Vec<Value>>,
}

pub struct Dispatcher {
    ctx: WorkflowContext,
    workflows: Arc<WorkflowRegistry>,
}

impl Dispatcher {
    pub fn new(ctx: WorkflowContext, workflows: Arc<WorkflowRegistry>) -> Self {
        Self { ctx, workflows }
    }

    /// Handle one inbound frame. Recognized requests spawn their workflow
    /// and return its id; the socket loop never waits for completion.
    pub fn handle(&self, connection_id: &ConnectionId, raw: &str) -> Option<WorkflowId> {
        let request: ClientRequest = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(connection = %connection_id, %error, "dropping unrecognized frame");
                return None;
            }
        };

        match request {
            ClientRequest::SmartCitySimulation { data } => {
                let Some(entry_point) = data.entry_point else {
                    tracing::warn!(connection = %connection_id, "simulation request without entry_point");
                    return None;
                };
                let ctx = self.ctx.clone();
                let id = self.workflows.spawn("smart_city_simulation", async move {
                    simulation::run(&ctx, &entry_point, data.details).await
                });
                Some(id)
            }
            ClientRequest::GenerateReport { data } => {
                let events = data.and_then(|d| d.events);
                let ctx = self.ctx.clone();
                let id = self.workflows.spawn("generate_report", async move {
                    report::generate_report(&ctx, events).await
                });
                Some(id)
            }
        }
    }
}
