//! Pipeline Agent - command-line entry point
//!
//! Usage:
//!   pipeline-agent <prompt>
//!   pipeline-agent --resume <id> [--instructions <text>] [--pause [reason] | --unpause]
//!
//! Every run prints the resulting snapshot as JSON and stores it under
//! `SNAPSHOT_DIR`.

use std::sync::Arc;

use anyhow::{bail, Context};
use pipeline_agent::actions::{ActionExecutor, HttpActionExecutor, NoActions};
use pipeline_agent::agent::LoggingCallbacks;
use pipeline_agent::llm::OpenAiClient;
use pipeline_agent::pipeline::{PipelineSchemaValidator, StepGraphCompiler};
use pipeline_agent::{
    AgentConfig, ControlRequest, JsonFileSnapshotStore, PipelineAgent, SnapshotStore,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

enum Command {
    Start(String),
    Resume {
        id: Uuid,
        controls: Vec<ControlRequest>,
    },
}

fn parse_args(args: Vec<String>) -> anyhow::Result<Command> {
    let mut args = args.into_iter().peekable();
    let Some(first) = args.next() else {
        bail!("usage: pipeline-agent <prompt> | --resume <id> [--instructions <text>] [--pause [reason] | --unpause]");
    };
    if first != "--resume" {
        let rest: Vec<String> = args.collect();
        let prompt = std::iter::once(first).chain(rest).collect::<Vec<_>>().join(" ");
        return Ok(Command::Start(prompt));
    }

    let id = args.next().context("--resume needs a conversation id")?;
    let id = Uuid::parse_str(&id).with_context(|| format!("invalid conversation id: {}", id))?;
    let mut controls = Vec::new();
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--instructions" => {
                let text = args.next().context("--instructions needs text")?;
                controls.push(ControlRequest::AddInstructions { text });
            }
            "--pause" => {
                let reason = args.next_if(|a| !a.starts_with("--"));
                controls.push(ControlRequest::Pause { reason });
            }
            "--unpause" => controls.push(ControlRequest::Resume),
            other => bail!("unknown flag: {}", other),
        }
    }
    Ok(Command::Resume { id, controls })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeline_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let command = parse_args(std::env::args().skip(1).collect())?;

    // Load configuration
    let config = AgentConfig::from_env()?;
    info!("Loaded configuration: model={}", config.default_model);

    let store = JsonFileSnapshotStore::open(&config.snapshot_dir).await?;

    let executor: Arc<dyn ActionExecutor> = match &config.action_executor_url {
        Some(url) => {
            let executor = HttpActionExecutor::connect(url)
                .await
                .with_context(|| format!("failed to reach action executor at {}", url))?;
            Arc::new(executor)
        }
        None => Arc::new(NoActions),
    };

    let agent = PipelineAgent::new(
        Arc::new(OpenAiClient::new(config.base_url.clone(), config.api_key.clone())),
        executor,
        Arc::new(PipelineSchemaValidator::new()),
        Arc::new(StepGraphCompiler::strict()),
        config.agent_options(),
    )
    .with_callbacks(Arc::new(LoggingCallbacks));

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let handle = match command {
        Command::Start(prompt) => agent.start_exchange(&prompt, None, &[], cancel).await?,
        Command::Resume { id, controls } => {
            let handle = store.load(id).await?;
            let previous = handle.snapshot.artifact.as_ref().map(|a| a.raw.clone());
            agent.resume_exchange(handle, previous, &controls, cancel).await?
        }
    };

    store.save(&handle).await?;
    info!(
        "Conversation {} is {} (snapshot in {})",
        handle.id,
        handle.snapshot.phase,
        store.dir().display()
    );
    println!("{}", serde_json::to_string_pretty(&handle)?);

    Ok(())
}
