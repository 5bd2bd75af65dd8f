//! CLI command definitions

use clap::Args;
use serde_json::Value;
use std::path::PathBuf;

/// Run a workflow
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow definition (YAML or JSON)
    #[arg(short, long)]
    pub file: PathBuf,

    /// Directory for run snapshots (defaults to $LEADFLOW_OUTPUT_DIR or ./output)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Simulate side effects (defaults to $ENABLE_DRY_RUN, or true)
    #[arg(long)]
    pub dry_run: Option<bool>,

    /// Stop at the first failed stage
    #[arg(long)]
    pub halt_on_failure: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Config overrides (dotted.key=value, value parsed as JSON when possible)
    #[arg(long = "set", value_parser = parse_key_value)]
    pub overrides: Vec<(String, String)>,
}

/// Validate a workflow definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow definition (YAML or JSON)
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List registered stage types
#[derive(Debug, Args, Clone)]
pub struct StagesCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}

/// Interpret an override value: JSON if it parses, otherwise a string
pub fn parse_override_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
