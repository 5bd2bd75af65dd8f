//! Subprocess stage - runs an external program as the stage body
//!
//! The program receives one JSON request on stdin:
//!
//! ```json
//! {"stage_id": "...", "stage_type": "...", "instructions": "...", "tools": [...], "inputs": {...}}
//! ```
//!
//! and must print one JSON document on stdout. A `{"status": "success",
//! "data": ...}` envelope is unwrapped to its `data`; `{"status": "error"}` or
//! an `"error"` key is a stage-reported failure.

use crate::core::{StageDescriptor, StageResult, ToolConfig};
use crate::stage::{check_required_inputs, StageError, StageExecutor, StageInput};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default subprocess timeout (seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// How to launch the stage program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubprocessConfig {
    /// Program to execute (looked up on PATH if not a path)
    pub program: String,

    /// Arguments passed to the program
    pub args: Vec<String>,

    /// Timeout for the whole exchange in seconds
    pub timeout_secs: u64,
}

impl SubprocessConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Build from an argv list; `None` if it is empty
    pub fn from_argv(argv: Vec<String>) -> Option<Self> {
        let mut parts = argv.into_iter();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Stage backed by an external program
#[derive(Debug, Clone)]
pub struct SubprocessStage {
    id: String,
    stage_type: String,
    config: SubprocessConfig,
    instructions: Option<String>,
    tools: Vec<ToolConfig>,
    required: Vec<String>,
}

impl SubprocessStage {
    pub fn new(id: impl Into<String>, stage_type: impl Into<String>, config: SubprocessConfig) -> Self {
        Self {
            id: id.into(),
            stage_type: stage_type.into(),
            config,
            instructions: None,
            tools: Vec::new(),
            required: Vec::new(),
        }
    }

    /// Build from a descriptor
    ///
    /// The descriptor's `command` wins over `default_program`; a stage with
    /// neither cannot be constructed.
    pub fn from_descriptor(
        descriptor: &StageDescriptor,
        default_program: Option<&str>,
    ) -> Result<Self, StageError> {
        let config = match (&descriptor.command, default_program) {
            (Some(command), _) => SubprocessConfig::from_argv(command.argv()).ok_or_else(|| {
                StageError::InvalidInput {
                    name: "command".to_string(),
                    reason: "command is empty".to_string(),
                }
            })?,
            (None, Some(program)) => SubprocessConfig::new(program),
            (None, None) => {
                return Err(StageError::InvalidInput {
                    name: "command".to_string(),
                    reason: format!("stage type '{}' needs a command", descriptor.stage_type),
                })
            }
        };
        let config = match descriptor.timeout_secs {
            Some(secs) => config.with_timeout(secs),
            None => config,
        };

        Ok(Self {
            id: descriptor.id.clone(),
            stage_type: descriptor.stage_type.clone(),
            config,
            instructions: descriptor.instructions.clone(),
            tools: descriptor.tools.clone(),
            required: descriptor.requires.clone(),
        })
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_required_inputs<I, S>(mut self, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = required.into_iter().map(Into::into).collect();
        self
    }

    pub fn config(&self) -> &SubprocessConfig {
        &self.config
    }

    fn request(&self, input: StageInput) -> Value {
        json!({
            "stage_id": self.id,
            "stage_type": self.stage_type,
            "instructions": self.instructions,
            "tools": self.tools,
            "inputs": Value::Object(input.into_inner()),
        })
    }

    async fn run(&self, input: StageInput) -> Result<Value, StageError> {
        let payload = serde_json::to_vec(&self.request(input))
            .map_err(|e| StageError::Internal(format!("Failed to encode stage request: {}", e)))?;

        debug!(
            "Spawning stage '{}' program '{}' with {} bytes of input",
            self.id,
            self.config.program,
            payload.len()
        );

        let output = timeout(
            Duration::from_secs(self.config.timeout_secs),
            self.exchange(&payload),
        )
        .await
        .map_err(|_| StageError::Timeout(self.config.timeout_secs))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(StageError::Process(format!(
                "'{}' exited with code {}: {}",
                self.config.program,
                exit_code,
                stderr.trim()
            )));
        }

        debug!(
            "Stage '{}' returned {} bytes of output",
            self.id,
            output.stdout.len()
        );

        interpret_output(&output.stdout)
    }

    async fn exchange(&self, payload: &[u8]) -> Result<std::process::Output, StageError> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                StageError::Process(format!("Failed to spawn '{}': {}", self.config.program, e))
            })?;

        // Feed stdin while draining stdout and stderr so a program that
        // writes as it reads never fills its pipes
        let stdin = child.stdin.take();
        let write_request = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(payload).await {
                // A program may exit without reading its request
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            }
        };

        let (written, output) = tokio::join!(write_request, child.wait_with_output());
        written.map_err(|e| StageError::Process(format!("Failed to write stage request: {}", e)))?;

        output
            .map_err(|e| StageError::Process(format!("Failed to wait for '{}': {}", self.config.program, e)))
    }
}

#[async_trait]
impl StageExecutor for SubprocessStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn stage_type(&self) -> &str {
        &self.stage_type
    }

    fn required_inputs(&self) -> &[String] {
        &self.required
    }

    async fn execute(&self, input: StageInput) -> StageResult {
        if let Err(e) = check_required_inputs(&input, &self.required) {
            return e.into_result(&self.id);
        }

        match self.run(input).await {
            Ok(data) => StageResult::success(data),
            Err(e) => {
                warn!("Stage '{}' failed: {}", self.id, e);
                e.into_result(&self.id)
            }
        }
    }
}

/// Turn a stage program's stdout into its payload
pub fn interpret_output(stdout: &[u8]) -> Result<Value, StageError> {
    let text = std::str::from_utf8(stdout)
        .map_err(|e| StageError::InvalidOutput(format!("output is not UTF-8: {}", e)))?;
    if text.trim().is_empty() {
        return Err(StageError::InvalidOutput("no output".to_string()));
    }

    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| StageError::InvalidOutput(format!("output is not JSON: {}", e)))?;

    let Value::Object(mut document) = value else {
        return Ok(value);
    };

    let status = document.get("status").and_then(Value::as_str);
    let error = document.get("error").filter(|e| !e.is_null());

    if status == Some("error") || error.is_some() {
        let message = error
            .or_else(|| document.get("message"))
            .map(|e| match e {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "stage reported status 'error'".to_string());
        return Err(StageError::Reported(message));
    }

    if status == Some("success") {
        if let Some(data) = document.remove("data") {
            return Ok(data);
        }
    }

    Ok(Value::Object(document))
}
