use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use shake_server::client;
use shake_server::config::{resolve_listen_addr, ServerConfig, WorkerConfig};
use shake_server::error::ShakeError;
use shake_server::node::Node;
use shake_server::protocol::response::NO_JOBS;
use shake_server::protocol::Request;
use shake_server::scheduler::{Job, JobParams};
use shake_server::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "shake-server")]
#[command(version)]
#[command(about = "Job dispatch server for urgent seismic shake scenarios")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the job server
    Server(ServerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Report a finished job to the server (run by workers)
    Notify(NotifyArgs),
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Host to bind the server
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the server
    #[arg(long, default_value = "5001")]
    port: u16,

    /// JSON file holding the job table
    #[arg(long, default_value = "shake_history.json")]
    history: PathBuf,

    /// Directory containing `<job_id>.zip` output archives
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Worker executable started for every job
    #[arg(long, default_value = "./urgentshake.py")]
    worker: PathBuf,

    /// Extra argument placed before the job arguments (repeatable)
    #[arg(long = "worker-arg", allow_hyphen_values = true)]
    worker_args: Vec<String>,

    /// Kill workers and mark their job failed after this many seconds
    #[arg(long)]
    worker_timeout: Option<u64>,

    /// Address workers use to report completion (default: the listen address)
    #[arg(long)]
    notify_addr: Option<String>,

    /// Maximum number of connections served at once
    #[arg(long, default_value = "64")]
    max_connections: usize,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "127.0.0.1:5001")]
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

#[derive(Parser, Debug)]
struct NotifyArgs {
    /// Server address
    #[arg(long, short = 'a', env = "SHAKE_SERVER_ADDR", default_value = "127.0.0.1:5001")]
    addr: String,

    /// Job ID to mark as completed
    #[arg(env = "SHAKE_JOB_ID")]
    job_id: u64,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a new shake scenario
    #[command(allow_negative_numbers = true)]
    Run {
        magnitude: f64,
        longitude: f64,
        latitude: f64,
        /// Depth (km)
        depth: f64,
        #[arg(long)]
        strike: Option<f64>,
        #[arg(long)]
        dip: Option<f64>,
        #[arg(long)]
        rake: Option<f64>,
    },
    /// List all scenarios
    List,
    /// Show details of a scenario
    Info { id: u64 },
    /// Mark a scenario as completed
    Complete { id: u64 },
    /// Delete a scenario
    Delete { id: u64 },
    /// Delete every scenario
    Reset,
    /// Download the output archive of a scenario
    Download {
        id: u64,
        /// Destination directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct RunOutput {
    job_id: u64,
}

#[derive(Serialize)]
struct JobListItem {
    job_id: String,
    timestamp: String,
    magnitude: String,
    status: String,
}

#[derive(Serialize)]
struct MessageOutput {
    message: String,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Split a `list` line back into its fields, dropping the labels.
fn parse_list_line(line: &str) -> Option<JobListItem> {
    let mut parts = line.split(" - ");
    let id = parts.next()?;
    let timestamp = parts.next()?;
    let magnitude = parts.next()?;
    let status = parts.next()?;
    Some(JobListItem {
        job_id: id.trim_start_matches("ID ").to_string(),
        timestamp: timestamp.to_string(),
        magnitude: magnitude.trim_start_matches("Magnitude: ").to_string(),
        status: status.trim_start_matches("Status: ").to_string(),
    })
}

fn print_message(
    response: &str,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            let output = MessageOutput {
                message: response.to_string(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => println!("{}", response),
    }
    Ok(())
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info");

    let listen_addr = resolve_listen_addr(&args.host, args.port).await?;

    let worker = WorkerConfig {
        program: args.worker,
        args: args.worker_args,
        timeout_secs: args.worker_timeout,
        notify_addr: args.notify_addr,
    };

    let config = ServerConfig::new(listen_addr)
        .with_history_path(args.history)
        .with_output_dir(args.output_dir)
        .with_max_connections(args.max_connections)
        .with_worker(worker);

    tracing::info!(
        listen_addr = %config.listen_addr,
        history = %config.history_path.display(),
        max_connections = config.max_connections,
        "Starting shake-server"
    );

    let node = Node::bind(config).await?;
    let shutdown = install_shutdown_handler();
    node.run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_run(
    addr: &str,
    params: JobParams,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client::send_request(addr, &Request::Run(params)).await?;
    let Ok(job_id) = response.trim().parse::<u64>() else {
        eprintln!("{}", response);
        std::process::exit(1);
    };

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&RunOutput { job_id })?);
        }
        OutputFormat::Table => {
            println!("Scenario started. Job ID: {}", job_id);
        }
    }
    Ok(())
}

async fn handle_list(
    addr: &str,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client::send_request(addr, &Request::List).await?;
    let jobs: Vec<JobListItem> = if response.trim() == NO_JOBS {
        Vec::new()
    } else {
        response.lines().filter_map(parse_list_line).collect()
    };

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No scenarios found.");
            } else {
                println!("{:<6} {:<20} {:<10} STATUS", "ID", "TIMESTAMP", "MAGNITUDE");
                println!("{}", "-".repeat(50));
                for job in &jobs {
                    println!(
                        "{:<6} {:<20} {:<10} {}",
                        job.job_id, job.timestamp, job.magnitude, job.status
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_info(
    addr: &str,
    id: u64,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client::send_request(addr, &Request::Info(id)).await?;
    let Ok(job) = serde_json::from_str::<Job>(&response) else {
        eprintln!("{}", response);
        std::process::exit(1);
    };

    match output_format {
        OutputFormat::Json => println!("{}", response),
        OutputFormat::Table => {
            let p = &job.params;
            println!("Scenario Details");
            println!("{}", "=".repeat(40));
            println!("ID:         {}", job.id);
            println!("Timestamp:  {}", job.timestamp);
            println!("Status:     {}", job.status());
            if let Some(failure) = &job.failure {
                println!("Failure:    {}", failure);
            }
            println!("{}", "-".repeat(40));
            println!("Magnitude:  {}", p.magnitude);
            println!("Longitude:  {}", p.longitude);
            println!("Latitude:   {}", p.latitude);
            println!("Depth:      {} km", p.depth);
            if let Some(strike) = p.strike {
                println!("Strike:     {}°", strike);
            }
            if let Some(dip) = p.dip {
                println!("Dip:        {}°", dip);
            }
            if let Some(rake) = p.rake {
                println!("Rake:       {}°", rake);
            }
        }
    }
    Ok(())
}

async fn handle_download(
    addr: &str,
    id: u64,
    dir: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    match client::download(addr, id, &dir).await {
        Ok(path) => {
            println!("Download completed: {}", path.display());
            Ok(())
        }
        Err(ShakeError::NoData(_)) => {
            eprintln!("Error: No data available for job {}", id);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Job { client, command } => {
            init_tracing("warn");
            let addr = client.addr.as_str();

            match command {
                JobCommands::Run {
                    magnitude,
                    longitude,
                    latitude,
                    depth,
                    strike,
                    dip,
                    rake,
                } => {
                    let params = JobParams::new(magnitude, longitude, latitude, depth)
                        .with_mechanism(strike, dip, rake);
                    handle_run(addr, params, &client.output).await?;
                }
                JobCommands::List => handle_list(addr, &client.output).await?,
                JobCommands::Info { id } => handle_info(addr, id, &client.output).await?,
                JobCommands::Complete { id } => {
                    let response = client::send_request(addr, &Request::Complete(id)).await?;
                    print_message(&response, &client.output)?;
                }
                JobCommands::Delete { id } => {
                    let response = client::send_request(addr, &Request::Delete(id)).await?;
                    print_message(&response, &client.output)?;
                }
                JobCommands::Reset => {
                    let response = client::send_request(addr, &Request::Reset).await?;
                    print_message(&response, &client.output)?;
                }
                JobCommands::Download { id, path } => handle_download(addr, id, path).await?,
            }
        }
        Commands::Notify(notify) => {
            init_tracing("warn");
            match client::notify_completion(&notify.addr, notify.job_id).await {
                Ok(response) => println!("Server response: {}", response),
                Err(e) => {
                    eprintln!("Error: Could not notify {}: {}", notify.addr, e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
