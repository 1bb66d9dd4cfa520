use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;

use civic_core::{BroadcastBus, HistoryLog};
use civic_engine::{from_fn, AgentExecutor, Scheduler};
use civic_server::ServerConfig;
use civic_workflows::{AgentRoster, WorkflowContext, WorkflowRegistry};

#[derive(Parser)]
#[command(name = "civicd", about = "Agent workflow coordination server")]
struct Args {
    #[arg(long, default_value_t = 8008)]
    port: u16,

    /// Seconds a session may stay idle before the sweep evicts it.
    #[arg(long, default_value_t = 600)]
    idle_threshold: u64,

    /// Seconds between idle sweeps.
    #[arg(long, default_value_t = 300)]
    sweep_interval: u64,

    /// Seconds to wait before retrying after a failed sweep.
    #[arg(long, default_value_t = 60)]
    sweep_backoff: u64,

    /// Rolling window of history entries to retain.
    #[arg(long, default_value_t = 256)]
    history_capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let scheduler = Scheduler::new();
    let bus = BroadcastBus::new(1024);
    let history = Arc::new(HistoryLog::new(args.history_capacity));
    let ctx = WorkflowContext::new(scheduler.clone(), bus, history, offline_roster());
    let workflows = Arc::new(WorkflowRegistry::new());

    let config = ServerConfig {
        port: args.port,
        idle_threshold: Duration::from_secs(args.idle_threshold),
        sweep_interval: Duration::from_secs(args.sweep_interval),
        sweep_backoff: Duration::from_secs(args.sweep_backoff),
        ..Default::default()
    };

    let handle = civic_server::start(config, ctx, Arc::clone(&workflows)).await?;
    tracing::info!(port = handle.port, "civic server ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    // Drain running workflows, then cancel whatever tasks they left behind.
    workflows.drain().await;
    let aborted = scheduler.abort_all();
    if aborted > 0 {
        tracing::info!(aborted, "cancelled outstanding tasks");
    }
    Ok(())
}

/// Deployments bind real agent capabilities per role; the standalone binary
/// ships offline responders so every workflow still runs end to end.
fn offline_roster() -> AgentRoster {
    AgentRoster {
        safety: offline_agent("safety"),
        reporting: offline_agent("reporting"),
        traffic: offline_agent("traffic"),
        weather: offline_agent("weather"),
        parking: offline_agent("parking"),
        planning: offline_agent("planning"),
        data_collection: offline_agent("data-collection"),
    }
}

fn offline_agent(role: &'static str) -> Arc<dyn AgentExecutor> {
    from_fn(move |label, prompt| async move {
        let gist: String = prompt.chars().take(140).collect();
        Ok(json!({
            "result": format!("[{role}] {label}: assessment complete for \"{gist}\""),
        }))
    })
}
