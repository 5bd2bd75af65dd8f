//! Runtime settings read from the environment

use crate::core::context::Environment;
use std::path::PathBuf;

/// Env var holding the global dry-run flag
pub const DRY_RUN_VAR: &str = "ENABLE_DRY_RUN";

/// Env var overriding where run snapshots are written
pub const OUTPUT_DIR_VAR: &str = "LEADFLOW_OUTPUT_DIR";

/// Env var holding the default log level
pub const LOG_LEVEL_VAR: &str = "LOG_LEVEL";

/// Settings that apply to a whole run rather than to one definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Default for every stage's `dry_run` input
    ///
    /// Side-effecting stages simulate instead of acting when this is set.
    /// Defaults to `true` so a misconfigured environment never sends email.
    pub dry_run: bool,

    /// Directory that receives run snapshots
    pub output_dir: PathBuf,

    /// Stop after the first failed stage (otherwise continue past failures)
    pub halt_on_failure: bool,

    /// Log level name (`INFO`, `DEBUG`, ...)
    pub log_level: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            dry_run: true,
            output_dir: PathBuf::from("output"),
            halt_on_failure: false,
            log_level: "INFO".to_string(),
        }
    }
}

impl RuntimeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read settings from the environment, falling back to defaults
    pub fn from_env(env: &dyn Environment) -> Self {
        let defaults = Self::default();
        Self {
            dry_run: env
                .var(DRY_RUN_VAR)
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.dry_run),
            output_dir: env
                .var(OUTPUT_DIR_VAR)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            halt_on_failure: defaults.halt_on_failure,
            log_level: env.var(LOG_LEVEL_VAR).unwrap_or(defaults.log_level),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_halt_on_failure(mut self, halt: bool) -> Self {
        self.halt_on_failure = halt;
        self
    }

    pub fn with_log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = log_level.into();
        self
    }

    /// Default `tracing` filter directive; `verbose` forces debug
    ///
    /// Python-style names (`WARNING`, `CRITICAL`) map to their tracing levels.
    pub fn log_filter(&self, verbose: bool) -> String {
        if verbose {
            return "debug".to_string();
        }
        match self.log_level.trim().to_lowercase().as_str() {
            "" => "info".to_string(),
            "warning" => "warn".to_string(),
            "critical" | "fatal" => "error".to_string(),
            level => level.to_string(),
        }
    }
}
