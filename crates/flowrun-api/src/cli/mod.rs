//! CLI command definitions and dispatch for the `flowrun` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod kinds;
pub mod plan;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use flowrun_core::{EngineConfig, TreeDocument};
use flowrun_types::Path;
use flowrun_types::config::{Discovery, EngineSettings};

/// Run the tasks described by a configuration document.
#[derive(Parser)]
#[command(name = "flowrun", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for task events, -vv for debug/trace logs).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every task in a document.
    Run {
        #[command(flatten)]
        document: DocumentArgs,

        /// Hand tasks values that still reference incomplete data.
        #[arg(long)]
        allow_incomplete: bool,

        /// Print the resulting document after a successful run.
        #[arg(long)]
        print_document: bool,
    },

    /// Show the tasks of a document and the order they would run in.
    Plan {
        #[command(flatten)]
        document: DocumentArgs,
    },

    /// List registered task kinds and their legacy aliases.
    Kinds,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Selects a document and the part of it holding tasks.
#[derive(Args)]
pub struct DocumentArgs {
    /// Document to read (.json, .yaml, .yml or .toml).
    pub file: PathBuf,

    /// Path of the subtree holding the tasks (e.g. `command.deploy`).
    #[arg(long)]
    pub root: Option<String>,

    /// Find tasks anywhere below the root by their kind field, instead of
    /// treating the root's direct children as the tasks.
    #[arg(long)]
    pub infer_tasks: bool,
}

impl DocumentArgs {
    pub async fn load(&self) -> Result<TreeDocument> {
        flowrun_infra::load_document(&self.file)
            .await
            .with_context(|| format!("failed to load {}", self.file.display()))
    }

    /// Engine switches: configuration file values overridden by flags.
    pub fn engine_config(&self, settings: &EngineSettings) -> Result<EngineConfig> {
        let mut config = EngineConfig::from(settings);
        if let Some(root) = &self.root {
            config.root = Path::parse(root).with_context(|| format!("invalid --root {root:?}"))?;
        }
        if self.infer_tasks {
            config.discovery = Discovery::ByShape;
        }
        Ok(config)
    }
}
