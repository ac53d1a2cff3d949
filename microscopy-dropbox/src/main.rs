mod cli;

use clap::{ArgAction, Parser, Subcommand};
use std::io::{self, Write};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{export, inspect, register};

#[derive(Parser)]
#[command(
    name = "microscopy-dropbox",
    about = "Microscopy ingestion CLI: register, inspect, export"
)]
struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an incoming folder into a store
    Register(register::RegisterArgs),
    /// Print the series metadata of a microscope file
    Inspect(inspect::InspectArgs),
    /// Copy registered datasets to a user folder or archive
    Export(export::ExportArgs),
}

fn progress(prog: f64, msg: &str) {
    let _ = writeln!(
        io::stderr(),
        "{}",
        serde_json::json!({"progress": prog, "message": msg})
    );
    let _ = io::stderr().flush();
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let result = match cli.command {
        Commands::Register(args) => register::run(args, progress),
        Commands::Inspect(args) => inspect::run(args, progress),
        Commands::Export(args) => export::run(args, progress),
    };
    if let Err(e) = &result {
        tracing::error!("Command failed: {}", e);
    }
    result
}
