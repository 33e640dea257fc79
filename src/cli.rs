// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "foreman", version, about = "Local AI-agent orchestration engine")]
pub struct Cli {
    /// Path to an explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Write tracing output to stderr (RUST_LOG controls the filter).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the reconciliation engine until interrupted.
    ///
    /// Tasks, agents, models and providers live in the SQLite database; an
    /// external RPC layer mutates them and signals the engine. Ctrl-C
    /// drains the work queue and stops within the shutdown grace period.
    Serve {
        /// Override the database path from config.
        #[arg(long)]
        db: Option<PathBuf>,
        /// Override the worker count from config.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Print the merged configuration and exit.
    ShowConfig,
}
