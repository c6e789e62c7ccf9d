//! CLI argument parsing for the batch runner.
//!
//! The CLI stays thin: it resolves config, builds the processor and tracker,
//! and leaves every policy decision to the library modules.
use crate::discovery::ProcessingStatus;
use crate::tracker::ExportFormat;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "stagerun",
    version,
    about = "Run pipeline stages over many items with durable progress tracking",
    after_help = "Examples:\n  stagerun init\n  stagerun run --items episodes.json --stage transcribe --command 'whisper-wrap'\n  stagerun status --show 'Night Shift'\n  stagerun export --out status.csv --format csv\n  stagerun mark ep-42 export complete --file out/ep-42.md\n  stagerun clear-completed",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Config file (defaults to $STAGERUN_CONFIG, ./stagerun.json, or the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Status file to read and update (overrides config)
    #[arg(long, global = true, value_name = "PATH")]
    pub status_file: Option<PathBuf>,

    /// Emit debug logging on stderr
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Init(InitArgs),
    Run(RunArgs),
    Status(StatusArgs),
    Export(ExportArgs),
    Mark(MarkArgs),
    ClearCompleted(ClearCompletedArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Write a default config file")]
pub struct InitArgs {
    /// Where to write the config
    #[arg(long, value_name = "PATH", default_value = crate::config::DEFAULT_CONFIG_FILE)]
    pub path: PathBuf,

    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Run one stage over the selected items")]
pub struct RunArgs {
    /// JSON array of {key, payload} items
    #[arg(long, value_name = "PATH")]
    pub items: PathBuf,

    /// Stage to run; must be a configured stage
    #[arg(long)]
    pub stage: String,

    /// Command to run per item (overrides the stage's configured command)
    #[arg(long, value_name = "CMD")]
    pub command: Option<String>,

    /// Label for logs and the session record (defaults to the stage name)
    #[arg(long)]
    pub label: Option<String>,

    /// Model name recorded on each started stage
    #[arg(long)]
    pub model: Option<String>,

    /// Concurrent workers
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Retries per item after the first failed attempt
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Fixed delay between attempts, in seconds
    #[arg(long, value_name = "SECS")]
    pub retry_delay: Option<f64>,

    /// Stop starting new items after the first failure
    #[arg(long)]
    pub stop_on_error: bool,

    /// Only items whose title or key contains this text
    #[arg(long)]
    pub name: Option<String>,

    /// Only items published on or after this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub from: Option<NaiveDate>,

    /// Only items published on or before this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub to: Option<NaiveDate>,

    /// Minimum duration in seconds
    #[arg(long, value_name = "SECS")]
    pub min_duration: Option<f64>,

    /// Maximum duration in seconds
    #[arg(long, value_name = "SECS")]
    pub max_duration: Option<f64>,

    /// Only items in this processing state (new, partial, complete)
    #[arg(long, value_name = "STATUS")]
    pub only: Option<ProcessingStatus>,

    /// Skip items whose `path` does not exist on disk
    #[arg(long)]
    pub existing_only: bool,

    /// Emit the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Show tracked items, most recently updated first")]
pub struct StatusArgs {
    /// Show a single item
    pub key: Option<String>,

    /// Only items whose show name contains this text
    #[arg(long)]
    pub show: Option<String>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Export the tracked status as JSON or CSV")]
pub struct ExportArgs {
    /// Output file
    #[arg(long, value_name = "PATH")]
    pub out: PathBuf,

    /// json or csv
    #[arg(long, default_value = "json")]
    pub format: ExportFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkAction {
    Start,
    Complete,
    Fail,
}

#[derive(Parser, Debug)]
#[command(about = "Record a stage transition for work done outside a run")]
pub struct MarkArgs {
    pub key: String,

    pub stage: String,

    #[arg(value_enum)]
    pub action: MarkAction,

    /// Error message (required for fail)
    #[arg(long, required_if_eq("action", "fail"))]
    pub error: Option<String>,

    /// Output file produced by the stage (repeatable; complete only)
    #[arg(long = "file", value_name = "PATH")]
    pub files: Vec<String>,

    /// Model used for the stage (start only)
    #[arg(long)]
    pub model: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Forget items whose terminal stage completed")]
pub struct ClearCompletedArgs {}
