//! Command-line interface definitions.

pub mod commands;
pub mod render;

use clap::{Parser, Subcommand};

/// Agentless configuration management engine.
#[derive(Debug, Parser)]
#[command(name = "anvil", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit machine-readable JSON where supported.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scaffold a new anvil project.
    Init {
        /// Project directory name; defaults to the current directory.
        name: Option<String>,
        /// Overwrite existing files.
        #[arg(long)]
        force: bool,
    },
    /// Compute the difference between desired and observed state.
    Plan {
        /// Path to the module file.
        #[arg(long, short)]
        module: String,
        /// Path to the inventory file.
        #[arg(long, short)]
        inventory: Option<String>,
        /// Write the plan summary as JSON to this path.
        #[arg(long, short)]
        output: Option<String>,
    },
    /// Execute the computed difference.
    Apply {
        /// Path to the module file.
        #[arg(long, short)]
        module: String,
        /// Path to the inventory file.
        #[arg(long, short)]
        inventory: Option<String>,
        /// Plan only; apply nothing.
        #[arg(long)]
        dry_run: bool,
        /// Skip the approval gate.
        #[arg(long)]
        auto_approve: bool,
    },
}
