//! CLI definitions for HostLink.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// HostLink CLI.
#[derive(Parser)]
#[command(name = "hostlink")]
#[command(about = "Drive a running IDE through the object-activation registry")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "hostlink.toml", global = true, env = "HOSTLINK_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List running host instances
    Discover {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Connect to an instance and print it
    Connect {
        /// Process id of the instance
        pid: u32,
    },

    /// Run a host command against an instance
    Exec {
        /// Process id of the instance
        pid: u32,

        /// Command name (e.g. Build.BuildSolution)
        command: String,

        /// Command arguments
        #[arg(long, default_value = "")]
        args: String,

        /// Timeout in milliseconds (defaults to the configured value)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Read a property from an instance
    Query {
        /// Process id of the instance
        pid: u32,

        /// Dotted property path (e.g. Solution.FullName)
        path: String,
    },

    /// Check whether an instance answers
    Health {
        /// Process id of the instance
        pid: u32,
    },

    /// Connect to every instance and monitor them until Ctrl-C
    Watch,
}
