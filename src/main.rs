use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use reverie::agents::RealAgentFactory;
use reverie::control_plane::{
    AgentController, AgentControllerConfig, ControlPlane, ControlPlaneCallbacks,
    ControlPlaneEvent, MemoryAgentTracker, Scheduler, SchedulerConfig,
};
use reverie::providers::OpenAIChatProvider;
use reverie::pubsub::InMemoryPubSub;
use reverie::storage::InMemoryStorage;
use reverie::tools::ToolRegistry;
use reverie::worker::{WorkerCallbacks, WorkerConfig};
use reverie::Config;

#[derive(Parser)]
#[command(name = "reverie")]
#[command(about = "Control plane for long-lived autonomous agent tasks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Run {
        #[arg(help = "Task description")]
        task: String,
        #[arg(long, default_value = "publisher", help = "Agent role: publisher or consumer")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { task, role } => run_task(&task, &role).await?,
    }

    Ok(())
}

async fn run_task(task: &str, role: &str) -> Result<()> {
    let config = Config::from_env();
    let api_key = config
        .openai_api_key
        .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is required"))?;

    let storage = Arc::new(InMemoryStorage::new());
    let pubsub = Arc::new(InMemoryPubSub::new());
    let provider = Arc::new(
        OpenAIChatProvider::new(api_key).with_tools(ToolRegistry::new(storage.clone()).schemas()),
    );

    let tracker = Arc::new(MemoryAgentTracker::new());
    let controller = Arc::new(AgentController::new(
        AgentControllerConfig::default(),
        tracker,
    ));
    let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default(), storage.clone()));

    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut callbacks = ControlPlaneCallbacks::new();
    callbacks.insert(
        ControlPlaneEvent::AgentFinalResponse,
        Arc::new(move |agent_id, response| {
            let _ = done_tx.send((agent_id, response));
        }),
    );

    let plane = Arc::new(ControlPlane::new(
        Arc::new(RealAgentFactory),
        storage,
        provider,
        pubsub,
        controller,
        scheduler,
        callbacks,
        WorkerCallbacks::new(),
        WorkerConfig::default(),
    ));

    let cancel = CancellationToken::new();
    let plane_handle = {
        let plane = plane.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { plane.start(&cancel).await })
    };

    let agent_id = plane.kickoff_task(&cancel, task, role)?;
    println!("Started {role} agent {agent_id} for task: {task}");

    if let Some((agent_id, response)) = done_rx.recv().await {
        println!("\nAgent {agent_id} reported:\n{response}");
    }

    plane.send_command("stop").await?;
    let _ = plane_handle.await;

    Ok(())
}
