//! Command-line interface for dronelog.
//!
//! This module provides the CLI structure for the `dronelog` binary. The
//! handlers live in `main.rs`.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, QueueCommand, SettingsArgs, SettingsCommand, StatusCommand, SyncCommand,
};

use crate::logging::Verbosity;

/// dronelog - Offline-first drone flight logbook
///
/// Record flight start and end events while offline and deliver them to a
/// Google Sheet or Excel table when a connection is available.
#[derive(Debug, Parser)]
#[command(name = "dronelog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record flight events and manage the pending queue
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Deliver pending records to the configured destination
    Sync(SyncCommand),

    /// Check that the configured destination is reachable
    Probe,

    /// View or change saved settings
    #[command(subcommand)]
    Settings(SettingsCommand),

    /// Show pending count and destination readiness
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}
