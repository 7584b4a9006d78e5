// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use drydock::domain::BackendKind;

#[derive(Parser)]
#[command(name = "drydock")]
#[command(about = "Lease-based deployment agent for Helm and Docker Compose")]
#[command(version)]
pub struct Cli {
    /// Config file (default: drydock.yml in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll for deployment tasks and execute them
    Run {
        /// Handle at most one task, then exit
        #[arg(long)]
        once: bool,
    },

    /// Fail in-progress tasks whose leases expired
    Sweep {
        /// Keep sweeping at this interval (e.g. 1m) until interrupted
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        watch: Option<Duration>,
    },

    /// Write a drydock.yml template
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,

        #[arg(long, value_enum, default_value_t = BackendArg::Helm)]
        backend: BackendArg,
    },

    /// Validate the configuration and store connectivity
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Helm,
    Compose,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Helm => BackendKind::Helm,
            BackendArg::Compose => BackendKind::Compose,
        }
    }
}
