// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! oj - command-line client for the backup job daemon (§4.10)

mod client;
mod commands;
mod exit_error;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{daemon, job, watch};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "oj", version, about = "Control the backup job daemon")]
struct Cli {
    /// Output format for commands that print structured data
    #[arg(short = 'o', long = "output", value_enum, default_value_t, global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Define, start, stop, delete, and inspect backup jobs
    Job(job::JobArgs),
    /// Start `ojd` and check its health
    Daemon(daemon::DaemonArgs),
    /// Stream live job and notification events
    Watch,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        let code = err.downcast_ref::<exit_error::ExitError>().map_or(1, |e| e.code);
        eprintln!("Error: {err}");
        std::process::exit(code);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Job(args) => job::job(args, cli.output).await,
        Commands::Daemon(args) => daemon::daemon(args, cli.output).await,
        Commands::Watch => watch::watch(cli.output).await,
    }
}
