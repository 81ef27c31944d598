// ABOUTME: Entry point for the herd CLI application.
// ABOUTME: Loads the inventory, runs the job on every host and prints outcomes as they arrive.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use herd::config::Inventory;
use herd::engine::{Runner, StopReason};
use herd::error::Result;
use herd::output::{Output, OutputMode};
use herd::ssh::SshTransport;
use herd::types::Job;
use std::env;
use tracing_subscriber::EnvFilter;

/// Exit status when at least one host did not succeed.
const EXIT_HOST_FAILURE: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };
    let mut output = Output::new(mode);

    let code = match run(cli, &mut output).await {
        Ok(true) => 0,
        Ok(false) => EXIT_HOST_FAILURE,
        Err(e) => {
            output.error(&e.to_string());
            1
        }
    };
    std::process::exit(code);
}

/// Returns whether every host succeeded.
async fn run(cli: Cli, output: &mut Output) -> Result<bool> {
    let inventory = match &cli.config {
        Some(path) => Inventory::load(path)?,
        None => Inventory::discover(&env::current_dir()?)?,
    };
    let targets = inventory.targets()?;

    let mut config = inventory.run_config();
    if let Some(concurrency) = cli.concurrency {
        config = config.concurrency(match concurrency {
            0 => targets.len(),
            n => n,
        });
    }
    if let Some(timeout) = cli.timeout {
        config = config.job_timeout(timeout);
    }
    if let Some(deadline) = cli.deadline {
        config = config.deadline(deadline);
    }

    let job = match cli.command {
        Commands::Exec { command } => Job::command(command.join(" ")),
        Commands::Upload { local, remote } => Job::upload(local, remote),
        Commands::Download { remote, local_dir } => {
            std::fs::create_dir_all(&local_dir)?;
            Job::download(remote, local_dir)
        }
    };

    let runner = Runner::new(SshTransport::new(inventory.ssh_config()), config);

    output.start_timer();
    let mut handle = runner.spawn(targets, job)?;

    let stopper = handle.stopper();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling remaining hosts");
            stopper.stop(StopReason::Requested);
        }
    });

    while let Some((target, outcome)) = handle.next().await {
        output.host(&target, &outcome);
    }

    let report = handle.collect().await;
    output.summary(&report.summary());
    Ok(report.all_succeeded())
}
