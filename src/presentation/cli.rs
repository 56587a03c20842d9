//! CLI Argument Parsing
//!
//! Global flags (--config, --json, --yes, --verbose) are inherited by all
//! subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Ferry - release configuration objects between environments
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: ./ferry.toml, then ~/.config/ferry/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Machine-readable output (NDJSON events, JSON summaries)
    #[arg(long, global = true)]
    pub json: bool,

    /// Answer every prompt with yes
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Local files of a release
#[derive(Args, Debug, Clone)]
pub struct ManifestArgs {
    /// Release manifest (YAML)
    pub manifest: PathBuf,

    /// Root of the local source snapshots (default: the manifest's directory)
    #[arg(long)]
    pub snapshots: Option<PathBuf>,

    /// Deploy state file (default: .ferry/deploy_state.json next to the manifest)
    #[arg(long)]
    pub state: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show what a release would create and update, without writing
    Plan {
        #[command(flatten)]
        files: ManifestArgs,

        /// Skip the comparison against the deploy state
        #[arg(long)]
        no_compare: bool,
    },

    /// Plan, confirm and deploy a release
    Apply {
        #[command(flatten)]
        files: ManifestArgs,

        /// Skip the comparison against the deploy state
        #[arg(long)]
        no_compare: bool,

        /// Maximum number of concurrent API calls
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Delete every deployed target of a manifest
    Revert {
        #[command(flatten)]
        files: ManifestArgs,
    },

    /// Write the manifest of the opposite release
    ReverseManifest {
        #[command(flatten)]
        files: ManifestArgs,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Forget every deployment of one source object in the deploy state
    Purge {
        #[command(flatten)]
        files: ManifestArgs,

        /// Resource type, plural (e.g. queues, hooks)
        #[arg(long = "type")]
        resource_type: String,

        /// Source object id
        #[arg(long)]
        id: i64,
    },
}

impl Commands {
    pub fn files(&self) -> &ManifestArgs {
        match self {
            Commands::Plan { files, .. }
            | Commands::Apply { files, .. }
            | Commands::Revert { files }
            | Commands::ReverseManifest { files, .. }
            | Commands::Purge { files, .. } => files,
        }
    }
}
