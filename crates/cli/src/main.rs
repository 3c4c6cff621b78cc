use crate::{
    commands::Commands,
    error::CliError,
    fixture::{FixtureTransport, NoTransport},
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use engine_config::settings::EngineConfig;
use engine_core::{
    state::{TaskStore, sled_store::SledTaskStore},
    transport::Transport,
};
use engine_processing::transform::rules::RuleTransform;
use engine_runtime::{Engine, NewTask};
use model::{
    core::identifiers::{OwnerId, StreamId, TaskId},
    task::{
        record::{IdRange, TaskRecord},
        status::TaskStatus,
    },
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod fixture;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(name = "relay", version, about = "Chat channel replication engine")]
struct Cli {
    #[arg(long, global = true, help = "Engine config file (JSON)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "State directory, defaults to ~/.relay/state")]
    state_dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "JSON fixture to serve as the chat platform; sends are logged beside it"
    )]
    fixture: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let coordinator = ShutdownCoordinator::new(CancellationToken::new());
    coordinator.register_handlers();

    let code = match run(cli, &coordinator).await {
        Ok(()) if coordinator.is_shutdown_requested() => ExitCode::ShutdownRequested,
        Ok(()) => ExitCode::Success,
        Err(e) => {
            error!(exit_code = e.exit_code().as_i32(), "{e}");
            e.exit_code()
        }
    };
    std::process::exit(code.as_i32());
}

async fn run(cli: Cli, coordinator: &ShutdownCoordinator) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let transform = Arc::new(RuleTransform::new(config.dispatch.caption_limit));
    let store = open_state_store(cli.state_dir.as_deref())?;
    let transport = open_transport(cli.fixture.as_deref()).await?;

    let engine = Engine::start(config, transport, store, transform)?;
    let result = execute(&engine, cli.command, coordinator).await;
    engine.shutdown().await;
    result
}

async fn execute(
    engine: &Engine,
    command: Commands,
    coordinator: &ShutdownCoordinator,
) -> Result<(), CliError> {
    match command {
        Commands::Create {
            owner,
            source,
            target,
            start,
            end,
            tail,
            extra_sources,
        } => {
            let request = if tail {
                NewTask::Tail {
                    owner: owner.into(),
                    source: source.into(),
                    target: target.into(),
                    extra_sources: extra_sources.into_iter().map(StreamId::from).collect(),
                }
            } else {
                let start = start.ok_or_else(|| {
                    CliError::InvalidArgs("either --start or --tail is required".into())
                })?;
                NewTask::Backfill {
                    owner: owner.into(),
                    source: source.into(),
                    target: target.into(),
                    range: IdRange::new(start, end),
                }
            };
            let task = engine.create_task(request).await?;
            output::print_task(&task);
        }
        Commands::Start { id, wait } => {
            let id = TaskId::from(id);
            let task = engine.start_task(&id).await?;
            finish_launch(engine, task, wait, coordinator).await?;
        }
        Commands::Pause { id } => {
            let task = engine.pause_task(&id.into()).await?;
            output::print_task(&task);
        }
        Commands::Resume { id, wait } => {
            let id = TaskId::from(id);
            let task = engine.resume_task(&id).await?;
            finish_launch(engine, task, wait, coordinator).await?;
        }
        Commands::Cancel { id } => {
            let task = engine.cancel_task(&id.into()).await?;
            output::print_task(&task);
        }
        Commands::StopTail { id } => {
            let task = engine.stop_tail(&id.into()).await?;
            output::print_task(&task);
        }
        Commands::Delete { id } => {
            let task = engine.delete_task(&id.into()).await?;
            println!("Deleted task {} ({})", task.id, task.status);
        }
        Commands::Status { id, json, history } => {
            let id = TaskId::from(id);
            let task = engine.snapshot(&id).await?;
            let journal = if history {
                Some(engine.history(&id).await?)
            } else {
                None
            };

            if json {
                match journal {
                    Some(journal) => output::print_json(&serde_json::json!({
                        "task": task,
                        "history": journal,
                    }))?,
                    None => output::print_json(&task)?,
                }
            } else {
                output::print_task(&task);
                if let Some(journal) = journal {
                    output::print_history(&journal);
                }
            }
        }
        Commands::List { owner, json } => {
            let owner = owner.map(OwnerId::from);
            let tasks = engine.list_tasks(owner.as_ref()).await?;
            if json {
                output::print_json(&tasks)?;
            } else {
                output::print_list(&tasks);
            }
        }
        Commands::Run => {
            let resumed = engine.resume_interrupted().await?;
            if resumed.is_empty() {
                println!("Nothing to resume");
                return Ok(());
            }
            info!(count = resumed.len(), "Resumed interrupted tasks");
            for task in resumed {
                let done = wait_for(engine, &task.id, coordinator).await?;
                output::print_task(&done);
            }
        }
    }

    Ok(())
}

/// Prints a freshly launched task, or runs it to the end with `wait`.
async fn finish_launch(
    engine: &Engine,
    task: TaskRecord,
    wait: bool,
    coordinator: &ShutdownCoordinator,
) -> Result<(), CliError> {
    if !wait {
        output::print_task(&task);
        info!(task_id = %task.id, "Task handed over; `relay run` continues it");
        return Ok(());
    }

    let done = wait_for(engine, &task.id, coordinator).await?;
    output::print_task(&done);
    if done.status == TaskStatus::Failed {
        return Err(CliError::TaskFailed {
            id: done.id.to_string(),
            reason: done.error.unwrap_or_default(),
        });
    }
    Ok(())
}

async fn wait_for(
    engine: &Engine,
    id: &TaskId,
    coordinator: &ShutdownCoordinator,
) -> Result<TaskRecord, CliError> {
    let token = coordinator.cancel_token();
    tokio::select! {
        finished = engine.wait(id) => Ok(finished?),
        _ = token.cancelled() => Err(CliError::ShutdownRequested),
    }
}

fn open_state_store(dir: Option<&Path>) -> Result<Arc<dyn TaskStore>, CliError> {
    let path = match dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::home_dir()
            .ok_or_else(|| CliError::Unexpected("Could not determine home directory".into()))?
            .join(".relay/state"),
    };
    let store = SledTaskStore::open(&path).map_err(|err| CliError::StateStore {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    Ok(Arc::new(store))
}

async fn open_transport(fixture: Option<&Path>) -> Result<Arc<dyn Transport>, CliError> {
    match fixture {
        Some(path) => Ok(Arc::new(FixtureTransport::load(path).await?)),
        None => Ok(Arc::new(NoTransport)),
    }
}
