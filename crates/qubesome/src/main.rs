mod cmd;
mod config;
mod dispatcher;
mod error;
mod git;
mod logging;
mod mime;
mod paths;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "qubesome", version)]
struct Cli {
    /// Config file (default: ~/.qubesome/qubesome.config)
    #[arg(long, global = true, env = "QUBESOME_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a profile: nested X server, window manager and profile socket
    Start(cmd::StartArgs),
    /// Run a workload in a profile
    Run(cmd::RunArgs),
    /// Open a URI with the workload configured for its scheme
    XdgOpen(cmd::XdgOpenArgs),
    /// Run a flatpak app on a profile's display
    Flatpak(cmd::FlatpakArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start(args) => cmd::run_start(args, cli.config).await,
        Command::Run(args) => cmd::run_workload(args, cli.config).await,
        Command::XdgOpen(args) => cmd::run_xdg_open(args, cli.config).await,
        Command::Flatpak(args) => cmd::run_flatpak(args, cli.config).await,
    };

    match result {
        Ok(0) => ExitCode::SUCCESS,
        // Runner exit codes are passed through.
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
