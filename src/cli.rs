use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::LoadMode;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Execute approved document-to-table field mappings",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Generate load statements for every mapped table without executing them
    Generate(GenerateArgs),
    /// Check every generated statement against the target database without loading
    Validate(ValidateArgs),
    /// Load one source document into the target database
    Execute(ExecuteArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Upsert,
    View,
}

impl From<ModeArg> for LoadMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Upsert => LoadMode::Upsert,
            ModeArg::View => LoadMode::View,
        }
    }
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Mapping file (.yaml, .yml, .json or .csv)
    #[arg(short, long)]
    pub mappings: PathBuf,
    /// Target schema file (.yaml or .json)
    #[arg(short, long)]
    pub schema: PathBuf,
    /// Load mode; overrides the configuration file
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,
    /// Optional engine configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Directory receiving one .sql file per table plus manifest.json
    #[arg(long)]
    pub artifacts: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// SQLite database holding the target tables
    #[arg(short, long)]
    pub database: PathBuf,
    /// Mapping file (.yaml, .yml, .json or .csv)
    #[arg(short, long)]
    pub mappings: PathBuf,
    /// Target schema file; introspected from the database when omitted
    #[arg(short, long)]
    pub schema: Option<PathBuf>,
    /// Load mode; overrides the configuration file
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,
    /// Optional engine configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Print the full validation result as JSON instead of a summary table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ExecuteArgs {
    /// SQLite database holding the target tables
    #[arg(short, long)]
    pub database: PathBuf,
    /// Source document as JSON
    #[arg(long)]
    pub document: PathBuf,
    /// Identifier recorded as the document's provenance
    #[arg(long = "document-id")]
    pub document_id: String,
    /// Mapping file (.yaml, .yml, .json or .csv)
    #[arg(short, long)]
    pub mappings: PathBuf,
    /// Target schema file; introspected from the database when omitted
    #[arg(short, long)]
    pub schema: Option<PathBuf>,
    /// Load mode; overrides the configuration file
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,
    /// Optional engine configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Per-statement timeout in seconds (0 disables it)
    #[arg(long = "timeout-secs")]
    pub timeout_secs: Option<u64>,
    /// Resolve duplicate target columns in favour of higher confidence
    #[arg(long = "prefer-confidence")]
    pub prefer_confidence: bool,
    /// Write the result into the execution and reconciliation log tables
    #[arg(long = "persist-audit")]
    pub persist_audit: bool,
    /// Print the full execution result as JSON instead of a summary table
    #[arg(long)]
    pub json: bool,
}
