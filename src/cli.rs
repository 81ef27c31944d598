// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines global run options and the exec/upload/download subcommands.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "herd")]
#[command(about = "Run a command or copy a file on many hosts over SSH")]
#[command(version)]
pub struct Cli {
    /// Inventory file (defaults to herd.yml, herd.yaml or herd.json in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print hosts that did not succeed, plus the summary
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Emit JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Maximum number of hosts in flight (overrides the inventory; 0 = one per host)
    #[arg(short = 'p', long, global = true)]
    pub concurrency: Option<usize>,

    /// Per-host command/transfer timeout, e.g. "30s" (overrides the inventory)
    #[arg(short, long, global = true, value_parser = humantime_serde::re::humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Deadline for the whole run, e.g. "5m" (overrides the inventory)
    #[arg(long, global = true, value_parser = humantime_serde::re::humantime::parse_duration)]
    pub deadline: Option<Duration>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a shell command on every host
    Exec {
        /// Command line, passed to the remote shell as-is
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Copy a local file to the same path on every host
    Upload {
        /// Local file
        local: PathBuf,
        /// Remote destination path
        remote: String,
    },

    /// Copy a remote file from every host into a local directory
    Download {
        /// Remote file
        remote: String,
        /// Local directory; each host's copy is named user@host:port
        local_dir: PathBuf,
    },
}
