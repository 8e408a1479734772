use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use courier_core::ports::TaskStore;
use courier_core::{
    ConnectionInfo, EndpointId, EndpointQueue, QueueClient, QueueConfig, Task, TaskHandler,
    TaskId, WorkerGroup,
};

/// courier CLI.
#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Task-dispatch queue over Redis")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Redis host (overrides REDIS_HOST and the config file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Redis port (overrides REDIS_PORT and the config file)
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Put one item on the `task` queue and read it back
    Smoke,

    /// Create a task record and enqueue it for an endpoint
    Submit {
        #[arg(long)]
        endpoint: String,

        /// Task id (generated when omitted)
        #[arg(long)]
        task_id: Option<String>,
    },

    /// Run echo workers for an endpoint until Ctrl-C
    Work {
        #[arg(long)]
        endpoint: String,

        #[arg(long, default_value_t = 1)]
        workers: usize,

        /// Blocking pop timeout in seconds (defaults to the config value)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,
    },
}

/// worker：タスクの id をそのまま返すだけのハンドラ
struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, task: &Task) -> Result<serde_json::Value, String> {
        info!(task_id = %task.task_id, "handling task");
        Ok(json!({ "task_id": task.task_id.as_str() }))
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<QueueConfig> {
    let config = match &cli.config {
        Some(path) => QueueConfig::from_file(path)?,
        None => QueueConfig::default(),
    };
    // 優先順位: --host / --port > REDIS_HOST / REDIS_PORT > 設定ファイル
    let mut config = config.apply_env()?;
    if let Some(host) = &cli.host {
        config.connection.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    Ok(config)
}

async fn smoke(info: ConnectionInfo) -> anyhow::Result<()> {
    let mut queue = QueueClient::redis("task", info);
    queue.connect().await?;
    queue
        .put(&TaskId::new("01"), "args", &json!({ "a": 1, "b": 2 }))
        .await?;

    match queue
        .get::<serde_json::Value>("args", Duration::from_secs(1))
        .await?
    {
        Some((task_id, payload)) => println!("Result : ({task_id}, {payload})"),
        None => println!("Result : <empty>"),
    }
    Ok(())
}

async fn submit(
    info: ConnectionInfo,
    endpoint: String,
    task_id: Option<String>,
) -> anyhow::Result<()> {
    let mut queue = EndpointQueue::redis(EndpointId::new(endpoint), info);
    queue.connect().await?;

    let mut task = match task_id {
        Some(id) => Task::new(TaskId::new(id)),
        None => Task::generate(),
    };
    queue.task_store()?.create(&task).await?;
    queue.enqueue(&mut task).await?;

    println!("{}", task.task_id);
    Ok(())
}

async fn work(
    info: ConnectionInfo,
    endpoint: String,
    workers: usize,
    poll_timeout: Duration,
) -> anyhow::Result<()> {
    let endpoint = EndpointId::new(endpoint);
    let queues = (0..workers.max(1))
        .map(|_| EndpointQueue::redis(endpoint.clone(), info.clone()))
        .collect();

    let group = WorkerGroup::spawn(queues, Arc::new(EchoHandler), poll_timeout);
    info!(%endpoint, workers = group.len(), "workers running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    group.shutdown_and_join().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let info = config.connection.clone();

    match cli.command {
        Commands::Smoke => smoke(info).await,
        Commands::Submit { endpoint, task_id } => submit(info, endpoint, task_id).await,
        Commands::Work {
            endpoint,
            workers,
            timeout,
        } => {
            let poll_timeout = timeout.map_or_else(|| config.poll_timeout(), Duration::from_secs);
            work(info, endpoint, workers, poll_timeout).await
        }
    }
}
