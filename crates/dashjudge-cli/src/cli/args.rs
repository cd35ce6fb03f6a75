use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_DB: &str = ".dashjudge/dashjudge.db";

#[derive(Parser)]
#[command(
    name = "dashjudge",
    version,
    about = "Generate dashboard configurations with an LLM and score them with an LLM judge"
)]
pub struct Cli {
    /// Log output on stderr: text | json (level via DASHJUDGE_LOG)
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    pub log_format: String,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a sample config
    Init(InitArgs),
    /// Load prompts and test cases from the config into the database
    Import(ImportArgs),
    /// Start an evaluation run and wait for it to finish
    Run(RunArgs),
    /// Show a run summary
    Status(StatusArgs),
    /// Request cancellation of a run
    Cancel(CancelArgs),
    /// Validate and repair a dashboard document
    Validate(ValidateArgs),
    /// Extract JSON from a raw model response
    Extract(ExtractArgs),
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "dashjudge.yaml")]
    pub config: PathBuf,

    /// Also write a .gitignore for the database directory
    #[arg(long)]
    pub gitignore: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ImportArgs {
    #[arg(long, default_value = "dashjudge.yaml")]
    pub config: PathBuf,

    #[arg(long, env = "DASHJUDGE_DB", default_value = DEFAULT_DB)]
    pub db: PathBuf,

    /// Reject unknown config fields instead of warning
    #[arg(long)]
    pub strict: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = "dashjudge.yaml")]
    pub config: PathBuf,

    #[arg(long, env = "DASHJUDGE_DB", default_value = DEFAULT_DB)]
    pub db: PathBuf,

    #[arg(long)]
    pub strict: bool,

    /// Generation prompt id
    #[arg(long)]
    pub prompt: String,

    /// Generation prompt version (latest when omitted)
    #[arg(long)]
    pub prompt_version: Option<u32>,

    /// Generation model id
    #[arg(long)]
    pub model: String,

    /// Judge prompt id (defaults to judge.prompt from the config)
    #[arg(long)]
    pub judge_prompt: Option<String>,

    /// Judge model id (defaults to judge.model from the config)
    #[arg(long)]
    pub judge_model: Option<String>,

    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, env = "DASHJUDGE_DB", default_value = DEFAULT_DB)]
    pub db: PathBuf,

    /// Run id (most recent run when omitted)
    #[arg(long)]
    pub run_id: Option<i64>,

    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CancelArgs {
    #[arg(long, env = "DASHJUDGE_DB", default_value = DEFAULT_DB)]
    pub db: PathBuf,

    #[arg(long)]
    pub run_id: i64,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Document to validate ("-" for stdin)
    pub file: PathBuf,

    /// Report syntax errors instead of repairing them
    #[arg(long)]
    pub no_fix: bool,

    /// Input is a bare array of layers
    #[arg(long)]
    pub layers: bool,

    /// Treat warnings as errors
    #[arg(long)]
    pub strict: bool,

    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub format: String,

    /// Write the repaired document here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Raw response file ("-" for stdin)
    pub file: PathBuf,
}
