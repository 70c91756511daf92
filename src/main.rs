use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use workbus::bus::remote::RemoteBus;
use workbus::config::{BusConfig, CoordinatorConfig, WorkerConfig};
use workbus::coordinator::Coordinator;
use workbus::protocol::{ExecuteResponse, WorkerListResponse};
use workbus::shutdown::install_shutdown_handler;
use workbus::worker::handlers::HandlerRegistry;
use workbus::worker::WorkerRuntime;

#[derive(Parser, Debug)]
#[command(name = "workbus")]
#[command(version)]
#[command(about = "Job coordination across a dynamic worker pool over a message bus")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the coordinator
    Serve(ServeArgs),

    /// Start a worker process
    Worker(WorkerArgs),

    /// Dispatch a job and wait for the result
    Execute {
        #[command(flatten)]
        client: ClientArgs,

        /// Dispatch mode: sequential, random or address
        #[arg(long, default_value = "sequential")]
        mode: String,

        /// Target worker address (address mode only)
        #[arg(long)]
        target_address: Option<String>,

        /// Job type tag looked up in the worker's handler registry
        #[arg(long = "type", default_value = "ping")]
        job_type: String,

        /// Opaque data passed to the handler
        #[arg(long)]
        data: Option<String>,
    },

    /// List registered workers
    Workers {
        #[command(flatten)]
        client: ClientArgs,
    },
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Port to listen on for HTTP and the bus relay
    #[arg(long, env = "WORKBUS_PORT", default_value = "3000")]
    port: u16,

    /// Shared key bus clients must present on connect
    #[arg(long, env = "WORKBUS_APP_KEY")]
    app_key: Option<String>,

    /// Seconds an /execute caller waits before the dispatch times out
    #[arg(long, default_value = "30")]
    request_timeout: u64,

    /// Seconds between liveness sweeps
    #[arg(long, default_value = "20")]
    sweep_interval: u64,

    /// Heartbeat age in seconds beyond which a worker is evicted
    #[arg(long, default_value = "30")]
    heartbeat_timeout: u64,
}

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Coordinator base URL
    #[arg(long, env = "WORKBUS_SERVER_URL", default_value = "http://127.0.0.1:3000")]
    coordinator_url: String,

    /// Shared bus key, when the coordinator requires one
    #[arg(long, env = "WORKBUS_APP_KEY")]
    app_key: Option<String>,

    /// Fixed address to register under (skips the public-address lookup)
    #[arg(long)]
    address: Option<String>,

    /// Seconds between heartbeats
    #[arg(long, default_value = "15")]
    heartbeat_interval: u64,

    /// HTTP endpoint that echoes this worker's public address
    #[arg(long, default_value = "https://ipconfig.io")]
    address_echo_url: String,

    /// Default host probed by the ping handler
    #[arg(long, default_value = "google.com")]
    ping_host: String,

    /// Upstream base URL for the proxy handler (enables it)
    #[arg(long, env = "WORKBUS_PROXY_URL")]
    proxy_url: Option<String>,

    /// API key forwarded by the proxy handler
    #[arg(long, env = "WORKBUS_PROXY_API_KEY")]
    proxy_api_key: Option<String>,
}

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Coordinator address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:3000")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', value_enum, default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let config = CoordinatorConfig {
        listen_addr,
        request_timeout: Duration::from_secs(args.request_timeout),
        sweep_interval: Duration::from_secs(args.sweep_interval),
        heartbeat_timeout: Duration::from_secs(args.heartbeat_timeout),
        bus: BusConfig {
            app_key: args.app_key,
        },
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        request_timeout_secs = args.request_timeout,
        "Starting workbus coordinator"
    );

    let shutdown = install_shutdown_handler();
    Coordinator::new(config).run(shutdown).await?;
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut config = WorkerConfig::new(args.coordinator_url);
    config.address_override = args.address;
    config.heartbeat_interval = Duration::from_secs(args.heartbeat_interval);
    config.address_echo_url = args.address_echo_url;
    config.ping_host = args.ping_host;
    config.proxy_base_url = args.proxy_url;
    config.proxy_api_key = args.proxy_api_key;
    config.bus = BusConfig {
        app_key: args.app_key,
    };

    let handlers = HandlerRegistry::builtin(&config);
    let bus = RemoteBus::connect(&config.bus_url, config.bus.app_key.as_deref()).await?;
    let worker = WorkerRuntime::new(config, handlers);

    tracing::info!(worker_id = %worker.id(), "Starting workbus worker");

    let shutdown = install_shutdown_handler();
    worker.run(Arc::new(bus), shutdown).await?;
    Ok(())
}

async fn handle_execute(
    client: &ClientArgs,
    mode: String,
    target_address: Option<String>,
    job_type: String,
    data: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut body = serde_json::json!({ "mode": mode, "type": job_type });
    if let Some(target) = target_address {
        body["targetAddress"] = serde_json::Value::String(target);
    }
    if let Some(data) = data {
        body["data"] = serde_json::Value::String(data);
    }

    let response = reqwest::Client::new()
        .post(format!("{}/execute", client.addr))
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        eprintln!("Error ({}): {}", status, text);
        std::process::exit(1);
    }

    let result: ExecuteResponse = response.json().await?;
    match client.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Table => {
            println!("Selected worker: {}", result.selected_worker);
            println!("Result:");
            println!("{}", serde_json::to_string_pretty(&result.result)?);
        }
    }
    Ok(())
}

async fn handle_workers(client: &ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let response: WorkerListResponse = reqwest::Client::new()
        .get(format!("{}/workers", client.addr))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    match client.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Table => {
            if response.workers.is_empty() {
                println!("No workers registered.");
                return Ok(());
            }
            println!("{:<38} {:<18} {:<6} FLAGS", "WORKER ID", "ADDRESS", "JOBS");
            println!("{}", "-".repeat(72));
            for worker in &response.workers {
                let mut flags = Vec::new();
                if worker.is_last_selected {
                    flags.push("last");
                }
                if worker.is_next_sequential {
                    flags.push("next");
                }
                println!(
                    "{:<38} {:<18} {:<6} {}",
                    worker.worker_id,
                    worker.address,
                    worker.total_jobs_dispatched,
                    flags.join(",")
                );
            }
            println!();
            println!("Total: {}", response.total);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => run_serve(serve_args).await?,
        Commands::Worker(worker_args) => run_worker(worker_args).await?,
        Commands::Execute {
            client,
            mode,
            target_address,
            job_type,
            data,
        } => handle_execute(&client, mode, target_address, job_type, data).await?,
        Commands::Workers { client } => handle_workers(&client).await?,
    }

    Ok(())
}
