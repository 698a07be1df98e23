//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use drivemirror::config::{
    DEFAULT_DB_PATH, DEFAULT_PAGE_SIZE, DEFAULT_RATE_PER_SEC, DEFAULT_RETRY_LIMIT,
    DEFAULT_SA_LOCATION,
};

/// Mirror remote object trees between cloud storage containers.
///
/// drivemirror copies whole folder trees server-side, rotating through a
/// pool of service-account credentials and persisting progress so an
/// interrupted job can resume where it stopped.
#[derive(Parser, Debug)]
#[command(name = "drivemirror")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the local progress database
    #[arg(long, default_value = DEFAULT_DB_PATH, global = true)]
    pub db: PathBuf,

    /// Directory containing service-account credential files (*.json)
    #[arg(long, default_value = DEFAULT_SA_LOCATION, global = true)]
    pub sa_dir: PathBuf,

    /// Parallel remote calls and credential pool size (1-100)
    #[arg(short = 'P', long, default_value_t = 20, value_parser = clap::value_parser!(u16).range(1..=100))]
    pub parallel: u16,

    /// Retries per remote call before giving up
    #[arg(long, default_value_t = DEFAULT_RETRY_LIMIT)]
    pub retry_limit: u32,

    /// Aggregate request rate in calls per second (0 disables the gate)
    #[arg(long, default_value_t = DEFAULT_RATE_PER_SEC)]
    pub rate: u32,

    /// Files requested per listing page (capped at 1000)
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: i64,

    /// Override the remote API base URL
    #[arg(long, hide = true)]
    pub base_url: Option<String>,

    /// Destination used when a copy omits the target
    #[arg(long)]
    pub default_target: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// How to react when a copy request finds an existing task.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeArg {
    /// Prompt interactively.
    Ask,
    /// Resume, copying only files not yet marked.
    Continue,
    /// Start over under a fresh destination root.
    Restart,
    /// Leave the existing task untouched.
    Exit,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy a folder tree (or a single file) into a destination folder
    Copy {
        /// ID of the source folder or file
        source: String,

        /// ID of the destination folder (falls back to --default-target)
        target: Option<String>,

        /// Rename the new destination root; defaults to the source's name
        #[arg(short, long)]
        name: Option<String>,

        /// Skip files smaller than this many bytes
        #[arg(short = 's', long, default_value_t = 0)]
        min_size: i64,

        /// Do not create a new root; copy directly into the target folder
        #[arg(short = 'D', long)]
        dncr: bool,

        /// Refresh cached listings instead of trusting them
        #[arg(short = 'u', long)]
        update: bool,

        /// The source is not a shared drive (cheaper list queries)
        #[arg(short = 'N', long)]
        not_team_drive: bool,

        /// What to do when a previous copy of this pair exists
        #[arg(long, value_enum, default_value_t = ResumeArg::Ask)]
        resume: ResumeArg,
    },

    /// Walk a folder tree and print a per-extension summary
    Count {
        /// ID of the folder to count
        id: String,

        /// Sort detail rows by name or size (default: file count)
        #[arg(short, long, default_value = "")]
        sort: String,

        /// Output format: table or json
        #[arg(short = 't', long, default_value = "table")]
        format: String,

        /// Write the summary to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Re-walk the tree instead of serving cached listings
        #[arg(short = 'u', long)]
        update: bool,

        /// The source is not a shared drive (cheaper list queries)
        #[arg(short = 'N', long)]
        not_team_drive: bool,
    },
}
