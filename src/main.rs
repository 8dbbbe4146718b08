use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use calibration_runner::calibration::simulated::builtin_library;
use calibration_runner::calibration::{CalibrationLibrary, Registry};
use calibration_runner::config::RunnerConfig;
use calibration_runner::runner::Runner;
use calibration_runner::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "calibration-runner")]
#[command(version)]
#[command(about = "Runs calibration nodes and workflows one at a time")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the runner API server
    Serve(ServeArgs),

    /// Print the calibration library catalog as JSON
    Catalog,
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address to bind the HTTP API to
    #[arg(long, env = "CALIBRATION_RUNNER_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port for the HTTP API
    #[arg(long, env = "CALIBRATION_RUNNER_PORT", default_value = "8001")]
    port: u16,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "CALIBRATION_RUNNER_LOG", default_value = "info")]
    log_filter: String,

    /// Disable the permissive CORS layer
    #[arg(long)]
    no_cors: bool,

    /// Wall-clock seconds per simulated second for the built-in nodes
    #[arg(long, env = "CALIBRATION_RUNNER_TIME_SCALE", default_value = "1.0")]
    time_scale: f64,
}

async fn run_server(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = RunnerConfig::new(SocketAddr::new(args.host, args.port))
        .with_log_filter(args.log_filter)
        .with_cors(!args.no_cors)
        .with_time_scale(args.time_scale);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    let time_scale = config.time_scale;
    let registry: Arc<dyn Registry> =
        Arc::new(CalibrationLibrary::new(move || builtin_library(time_scale)));

    tracing::info!(
        listen_addr = %config.listen_addr,
        cors = config.cors_permissive,
        nodes = registry.nodes().len(),
        workflows = registry.workflows().len(),
        "Starting calibration runner"
    );

    let shutdown = install_shutdown_handler()?;
    let runner = Runner::new(config, registry);
    runner.run(shutdown).await?;

    Ok(())
}

fn print_catalog() -> Result<(), Box<dyn std::error::Error>> {
    let library = CalibrationLibrary::new(|| builtin_library(1.0));
    let nodes: BTreeMap<String, serde_json::Value> = library
        .nodes()
        .into_iter()
        .map(|n| (n.name().to_string(), n.serialize()))
        .collect();
    let workflows: BTreeMap<String, serde_json::Value> = library
        .workflows()
        .into_iter()
        .map(|w| (w.name().to_string(), w.serialize()))
        .collect();

    let catalog = serde_json::json!({ "nodes": nodes, "workflows": workflows });
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => run_server(serve_args).await?,
        Commands::Catalog => print_catalog()?,
    }

    Ok(())
}
