use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use testpool::api::payloads::{
    ErrorResponse, JobIdPayload, ScheduleTestsPayload, ScheduleTestsResponse, WorkerIdPayload,
};
use testpool::api::run_api;
use testpool::config::QueueServerConfig;
use testpool::models::{JobId, WorkerCapability, WorkerId};
use testpool::scheduler::{JobResults, JobState, WorkerAliveness};
use testpool::server::{QueueServer, WorkerStatus};
use testpool::shutdown::install_shutdown_handler;
use testpool::worker::{DistWorker, HttpQueueClient, ProcessBucketExecutor};

#[derive(Parser, Debug)]
#[command(name = "testpool")]
#[command(version)]
#[command(about = "Distributes test buckets across a pool of worker machines")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a queue server
    Server(ServerArgs),

    /// Start a worker that pulls buckets from a queue server
    Work(WorkArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Worker administration commands
    Worker {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: WorkerCommands,
    },
}

// =============================================================================
// Server and Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Path to a JSON configuration file (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on for HTTP
    #[arg(long, default_value = "41000")]
    port: u16,
}

#[derive(Parser, Debug)]
struct WorkArgs {
    /// Queue server URL
    #[arg(long, default_value = "http://127.0.0.1:41000")]
    queue_server: String,

    /// Worker ID (unique per machine)
    #[arg(long)]
    worker_id: String,

    /// Program run once per test; receives `<ClassName>/<methodName>` as its last argument
    #[arg(long)]
    runner: String,

    /// Extra arguments passed to the runner before the test name
    #[arg(long = "runner-arg")]
    runner_args: Vec<String>,

    /// Per-test timeout in seconds
    #[arg(long, default_value = "600")]
    test_timeout_secs: u64,

    /// Worker capabilities (format: "name=value", repeatable)
    #[arg(long = "capability")]
    capabilities: Vec<String>,
}

// =============================================================================
// Client Arguments (shared by job and worker commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Queue server URL
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:41000")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Schedule tests from a JSON file (`prioritizedJob`, `scheduleStrategy`,
    /// `testEntryConfigurations`)
    Schedule { file: PathBuf },
    /// Show the state of a job
    State { job_id: String },
    /// Show the final results of a job
    Results { job_id: String },
    /// Delete a job; outstanding buckets may still report results
    Delete { job_id: String },
}

#[derive(clap::Subcommand, Debug)]
enum WorkerCommands {
    /// Show aliveness of all known workers
    Status,
    /// Allow a blocked worker to pull buckets again
    Enable { worker_id: String },
    /// Block a worker; its buckets are reclaimed
    Disable { worker_id: String },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn parse_capabilities(raw: &[String]) -> BTreeSet<WorkerCapability> {
    raw.iter()
        .filter_map(|item| match item.split_once('=') {
            Some((name, value)) => Some(WorkerCapability::new(name.trim(), value.trim())),
            None => {
                tracing::warn!(capability = %item, "Invalid capability format, expected name=value");
                None
            }
        })
        .collect()
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

// =============================================================================
// Server and Worker
// =============================================================================

async fn run_server(args: ServerArgs) -> CliResult<()> {
    init_logging();

    let config = match &args.config {
        Some(path) => QueueServerConfig::load(path)?,
        None => QueueServerConfig::default(),
    };
    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;

    tracing::info!(
        addr = %addr,
        number_of_retries = config.number_of_retries,
        worker_alive_timeout_secs = config.worker_alive_timeout_secs,
        termination_policy = ?config.termination_policy,
        "Starting queue server"
    );

    let shutdown = install_shutdown_handler();
    let server = Arc::new(QueueServer::new(config));
    let pollers = server.start_pollers(shutdown.clone());

    let served = run_api(addr, server, shutdown.clone()).await;
    shutdown.cancel();
    for poller in pollers {
        if let Err(e) = poller.await {
            tracing::warn!(error = %e, "Poller task failed");
        }
    }
    served?;
    Ok(())
}

async fn run_worker(args: WorkArgs) -> CliResult<()> {
    init_logging();

    let client = HttpQueueClient::new(&args.queue_server)?;
    let executor = ProcessBucketExecutor::new(
        args.runner,
        args.runner_args,
        Duration::from_secs(args.test_timeout_secs),
    );
    let worker = DistWorker::new(args.worker_id, Arc::new(client), Arc::new(executor))
        .with_capabilities(parse_capabilities(&args.capabilities));

    let shutdown = install_shutdown_handler();
    let processed = worker.run(shutdown).await?;
    tracing::info!(buckets = processed, "Worker finished");
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

struct AdminClient {
    base_url: String,
    http: reqwest::Client,
}

impl AdminClient {
    fn new(addr: &str) -> Self {
        Self {
            base_url: addr.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn check(response: reqwest::Response) -> CliResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(error) => format!("{} ({})", error.message, error.error),
            Err(_) => format!("{status}: {body}"),
        };
        Err(message.into())
    }

    async fn post<P: Serialize, R: DeserializeOwned>(&self, path: &str, payload: &P) -> CliResult<R> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(payload)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_no_content<P: Serialize>(&self, path: &str, payload: &P) -> CliResult<()> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(payload)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> CliResult<R> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn handle_job_command(
    client: &AdminClient,
    command: JobCommands,
    output_format: &OutputFormat,
) -> CliResult<()> {
    match command {
        JobCommands::Schedule { file } => {
            let payload: ScheduleTestsPayload = serde_json::from_slice(&tokio::fs::read(&file).await?)?;
            let response: ScheduleTestsResponse = client.post("/scheduleTests", &payload).await?;
            match output_format {
                OutputFormat::Json => print_json(&response)?,
                OutputFormat::Table => {
                    println!("Tests scheduled successfully!");
                    println!("Job ID:  {}", response.job_id);
                    println!("Buckets: {}", response.bucket_count);
                }
            }
        }
        JobCommands::State { job_id } => {
            let state: JobState = client
                .post("/jobState", &JobIdPayload { job_id: JobId::from(job_id) })
                .await?;
            match output_format {
                OutputFormat::Json => print_json(&state)?,
                OutputFormat::Table => {
                    println!("Job ID:           {}", state.job_id);
                    println!("Status:           {}", state.status);
                    println!("Priority:         {}", state.priority);
                    println!("Depleted:         {}", state.is_depleted);
                    println!(
                        "Enqueued buckets: {} ({} tests)",
                        state.queue_state.enqueued_bucket_count, state.queue_state.enqueued_tests
                    );
                    println!(
                        "Dequeued buckets: {} ({} tests)",
                        state.queue_state.dequeued_bucket_count, state.queue_state.dequeued_tests
                    );
                }
            }
        }
        JobCommands::Results { job_id } => {
            let results: JobResults = client
                .post("/jobResults", &JobIdPayload { job_id: JobId::from(job_id) })
                .await?;
            match output_format {
                OutputFormat::Json => print_json(&results)?,
                OutputFormat::Table => {
                    if results.final_results.is_empty() {
                        println!("No final results yet.");
                    } else {
                        println!("{:<50} {:<8} {:<8} MESSAGE", "TEST", "OUTCOME", "ATTEMPTS");
                        println!("{}", "-".repeat(90));
                        for result in &results.final_results {
                            println!(
                                "{:<50} {:<8} {:<8} {}",
                                result.test_entry.test_name(),
                                result.outcome,
                                result.attempts,
                                result.last_result.message.as_deref().unwrap_or("")
                            );
                        }
                        let failed = results
                            .final_results
                            .iter()
                            .filter(|r| r.outcome.is_failure())
                            .count();
                        println!();
                        println!(
                            "{} tests, {} failed, {} bucket results",
                            results.final_results.len(),
                            failed,
                            results.testing_results.len()
                        );
                    }
                }
            }
        }
        JobCommands::Delete { job_id } => {
            let job_id = JobId::from(job_id);
            client
                .post_no_content("/jobDelete", &JobIdPayload { job_id: job_id.clone() })
                .await?;
            match output_format {
                OutputFormat::Json => print_json(&serde_json::json!({ "jobId": job_id, "deleted": true }))?,
                OutputFormat::Table => println!("Job {} deleted.", job_id),
            }
        }
    }
    Ok(())
}

async fn handle_worker_command(
    client: &AdminClient,
    command: WorkerCommands,
    output_format: &OutputFormat,
) -> CliResult<()> {
    match command {
        WorkerCommands::Status => {
            let workers: Vec<WorkerStatus> = client.get("/workerStatus").await?;
            match output_format {
                OutputFormat::Json => print_json(&workers)?,
                OutputFormat::Table => {
                    if workers.is_empty() {
                        println!("No workers registered.");
                        return Ok(());
                    }
                    println!("{:<30} {:<10} {:<10} DETAILS", "WORKER", "STATUS", "PERMITTED");
                    println!("{}", "-".repeat(70));
                    for worker in &workers {
                        let (status, details) = match &worker.aliveness {
                            WorkerAliveness::Alive {
                                bucket_ids_being_processed,
                            } => (
                                "alive",
                                format!("{} buckets in flight", bucket_ids_being_processed.len()),
                            ),
                            WorkerAliveness::Silent { last_alive_at } => {
                                ("silent", format!("last alive {}", last_alive_at))
                            }
                            WorkerAliveness::Blocked => ("blocked", String::new()),
                            WorkerAliveness::NotRegistered => ("unknown", String::new()),
                        };
                        let permitted = if worker.permitted { "[+]" } else { "[-]" };
                        println!(
                            "{:<30} {:<10} {:<10} {}",
                            worker.worker_id, status, permitted, details
                        );
                    }
                }
            }
        }
        WorkerCommands::Enable { worker_id } => {
            let worker_id = WorkerId::from(worker_id);
            client
                .post_no_content("/enableWorker", &WorkerIdPayload { worker_id: worker_id.clone() })
                .await?;
            println!("Worker {} enabled.", worker_id);
        }
        WorkerCommands::Disable { worker_id } => {
            let worker_id = WorkerId::from(worker_id);
            client
                .post_no_content("/disableWorker", &WorkerIdPayload { worker_id: worker_id.clone() })
                .await?;
            println!("Worker {} disabled.", worker_id);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> CliResult<()> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Work(work_args) => run_worker(work_args).await?,
        Commands::Job { client, command } => {
            let admin = AdminClient::new(&client.addr);
            handle_job_command(&admin, command, &client.output).await?;
        }
        Commands::Worker { client, command } => {
            let admin = AdminClient::new(&client.addr);
            handle_worker_command(&admin, command, &client.output).await?;
        }
    }

    Ok(())
}
