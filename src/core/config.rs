//! Workflow definition loading and validation
//!
//! Definitions are YAML or JSON documents:
//!
//! ```yaml
//! name: "Prospect to lead"
//! config:
//!   scoring:
//!     min_score: 70
//! stages:
//!   - id: find
//!     stageType: ProspectSearchAgent
//!     inputs:
//!       icp: "{{ config.icp }}"
//!   - id: rank
//!     stageType: ScoringAgent
//!     inputs:
//!       leads: "{{ find.output.leads }}"
//!       min_score: "{{ config.scoring.min_score }}"
//! ```
//!
//! The older key names (`workflow_name`, `steps`, `agent`) are accepted too.

use crate::core::binding::{substitute_env_in_str, substitute_env_placeholders, Binding, PlaceholderError};
use crate::core::context::Environment;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Structural problems with a workflow definition
///
/// All of these are fatal: they are reported before any stage runs.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read workflow definition {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse workflow definition: {0}")]
    Parse(String),

    #[error("workflow definition is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    InvalidField {
        field: String,
        expected: &'static str,
    },

    #[error("workflow definition declares no stages")]
    EmptyStages,

    #[error("stage #{index} is missing required field '{field}'")]
    MissingStageField { index: usize, field: &'static str },

    #[error("duplicate stage id '{0}'")]
    DuplicateStageId(String),

    #[error("stage '{stage_id}' has unknown stage type '{stage_type}'")]
    UnknownStageType { stage_id: String, stage_type: String },

    #[error("stage '{stage_id}' input '{input}' has a malformed binding: {source}")]
    MalformedBinding {
        stage_id: String,
        input: String,
        #[source]
        source: PlaceholderError,
    },

    #[error("stage '{stage_id}' could not be constructed: {message}")]
    Construction { stage_id: String, message: String },
}

/// Serialized form of a definition document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Json,
}

impl DefinitionFormat {
    /// Pick a format from the file extension, then from the content
    pub fn detect(path: Option<&Path>, content: &str) -> Self {
        let by_extension = path
            .and_then(|p| p.extension())
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"));

        match by_extension {
            Some(true) => DefinitionFormat::Json,
            Some(false) => DefinitionFormat::Yaml,
            None if content.trim_start().starts_with('{') => DefinitionFormat::Json,
            None => DefinitionFormat::Yaml,
        }
    }
}

/// Top-level workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name
    #[serde(alias = "workflow_name")]
    pub name: String,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Definition version (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Static configuration, readable through `{{ config.* }}`
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Stages, in execution order
    #[serde(alias = "steps")]
    pub stages: Vec<StageDescriptor>,

    /// Stop the run at the first failed stage
    #[serde(default)]
    pub halt_on_failure: bool,
}

/// One declared stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// Unique stage identifier
    pub id: String,

    /// Registry key of the executor that runs this stage
    #[serde(rename = "stageType", alias = "agent", alias = "stage_type")]
    pub stage_type: String,

    /// Input name -> literal or `{{ placeholder }}`
    #[serde(default, alias = "inputBindings")]
    pub inputs: IndexMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Free-form instructions handed to the stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// External tools the stage uses, with their configuration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolConfig>,

    /// Expected output shape; opaque to the orchestrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,

    /// Inputs the stage refuses to run without
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,

    /// Program backing a subprocess stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSpec>,

    /// Subprocess timeout (seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Tool configuration attached to a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,

    #[serde(default)]
    pub config: Value,
}

/// A command line, either as one string or as an argv list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Line(String),
    Argv(Vec<String>),
}

impl CommandSpec {
    /// Split into argv; a single string is split on whitespace
    pub fn argv(&self) -> Vec<String> {
        match self {
            CommandSpec::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            CommandSpec::Argv(argv) => argv.clone(),
        }
    }
}

impl WorkflowDefinition {
    /// Load a workflow definition from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, DefinitionFormat::detect(Some(path), &content))
    }

    /// Parse a workflow definition from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, DefinitionError> {
        Self::parse(yaml, DefinitionFormat::Yaml)
    }

    /// Parse a workflow definition from a JSON string
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        Self::parse(json, DefinitionFormat::Json)
    }

    /// Parse a definition in the given format and validate it
    pub fn parse(content: &str, format: DefinitionFormat) -> Result<Self, DefinitionError> {
        let document: Value = match format {
            DefinitionFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| DefinitionError::Parse(e.to_string()))?,
            DefinitionFormat::Json => serde_json::from_str(content)
                .map_err(|e| DefinitionError::Parse(e.to_string()))?,
        };
        Self::from_document(document)
    }

    /// Build a definition from an already-parsed document
    ///
    /// Checks the document's structure first so that missing fields are
    /// reported by name, then deserializes and validates the result.
    pub fn from_document(mut document: Value) -> Result<Self, DefinitionError> {
        drop_empty_blocks(&mut document);
        check_structure(&document)?;
        let definition: WorkflowDefinition =
            serde_json::from_value(document).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Validate the parsed definition
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.stages.is_empty() {
            return Err(DefinitionError::EmptyStages);
        }

        let mut seen_ids = HashSet::new();
        for stage in &self.stages {
            if !seen_ids.insert(stage.id.as_str()) {
                return Err(DefinitionError::DuplicateStageId(stage.id.clone()));
            }

            for (input, value) in &stage.inputs {
                Binding::parse(value).map_err(|source| DefinitionError::MalformedBinding {
                    stage_id: stage.id.clone(),
                    input: input.clone(),
                    source,
                })?;
            }
        }

        Ok(())
    }

    /// Non-fatal problems worth warning about
    ///
    /// A binding to a stage that is not declared earlier can only ever
    /// resolve to null, since stages run strictly in declared order.
    pub fn lint(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let mut earlier: HashSet<&str> = HashSet::new();

        for stage in &self.stages {
            for (input, value) in &stage.inputs {
                let Ok(Binding::Reference(reference)) = Binding::parse(value) else {
                    continue;
                };
                if let Some(target) = reference.referenced_stage() {
                    if !earlier.contains(target) {
                        warnings.push(format!(
                            "stage '{}' input '{}' references '{}', which does not run before it",
                            stage.id, input, target
                        ));
                    }
                }
            }
            earlier.insert(stage.id.as_str());
        }

        warnings
    }

    /// Get a stage by ID
    pub fn stage(&self, id: &str) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Stage ids in declared order
    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.id.as_str()).collect()
    }

    /// Set a (possibly nested) config value, e.g. `scoring.min_score`
    ///
    /// Intermediate mappings are created as needed; a non-mapping value in
    /// the way is replaced.
    pub fn set_config_value(&mut self, key_path: &str, value: Value) {
        let segments: Vec<&str> = key_path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut current = &mut self.config;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Some(map) = entry.as_object_mut() else {
                return;
            };
            current = map;
        }
        current.insert(last.to_string(), value);
    }
}

impl StageDescriptor {
    /// Copy of this descriptor with `{{ NAME }}` placeholders in its settings
    /// (instructions and tool config) replaced from the environment
    ///
    /// Input bindings are left alone; they are resolved at run time.
    pub fn with_env_substituted(&self, env: &dyn Environment) -> StageDescriptor {
        let lookup = |name: &str| env.var(name);
        let mut prepared = self.clone();

        prepared.instructions = self
            .instructions
            .as_deref()
            .map(|text| substitute_env_in_str(text, &lookup));
        for tool in &mut prepared.tools {
            tool.config = substitute_env_placeholders(&tool.config, &lookup);
        }

        prepared
    }
}

/// An empty `config:` or `inputs:` key parses as null; treat it as absent
fn drop_empty_blocks(document: &mut Value) {
    let Some(root) = document.as_object_mut() else {
        return;
    };
    if root.get("config").is_some_and(Value::is_null) {
        root.remove("config");
    }

    let stages = match root.get_mut("stages") {
        Some(stages) => Some(stages),
        None => root.get_mut("steps"),
    };
    if let Some(Value::Array(stages)) = stages {
        for stage in stages.iter_mut().filter_map(Value::as_object_mut) {
            for key in ["inputs", "inputBindings"] {
                if stage.get(key).is_some_and(Value::is_null) {
                    stage.remove(key);
                }
            }
        }
    }
}

fn check_structure(document: &Value) -> Result<(), DefinitionError> {
    let root = document.as_object().ok_or(DefinitionError::InvalidField {
        field: "<root>".to_string(),
        expected: "a mapping",
    })?;

    match root.get("name").or_else(|| root.get("workflow_name")) {
        None | Some(Value::Null) => return Err(DefinitionError::MissingField("name")),
        Some(Value::String(name)) if !name.trim().is_empty() => {}
        Some(_) => {
            return Err(DefinitionError::InvalidField {
                field: "name".to_string(),
                expected: "a non-empty string",
            })
        }
    }

    if let Some(config) = root.get("config") {
        if !config.is_object() && !config.is_null() {
            return Err(DefinitionError::InvalidField {
                field: "config".to_string(),
                expected: "a mapping",
            });
        }
    }

    let stages = match root.get("stages").or_else(|| root.get("steps")) {
        None | Some(Value::Null) => return Err(DefinitionError::MissingField("stages")),
        Some(Value::Array(stages)) => stages,
        Some(_) => {
            return Err(DefinitionError::InvalidField {
                field: "stages".to_string(),
                expected: "a sequence",
            })
        }
    };
    if stages.is_empty() {
        return Err(DefinitionError::EmptyStages);
    }

    for (index, stage) in stages.iter().enumerate() {
        let stage = stage.as_object().ok_or_else(|| DefinitionError::InvalidField {
            field: format!("stages[{}]", index),
            expected: "a mapping",
        })?;

        if !non_empty_str(stage.get("id")) {
            return Err(DefinitionError::MissingStageField { index, field: "id" });
        }

        let stage_type = stage
            .get("stageType")
            .or_else(|| stage.get("agent"))
            .or_else(|| stage.get("stage_type"));
        if !non_empty_str(stage_type) {
            return Err(DefinitionError::MissingStageField {
                index,
                field: "stageType",
            });
        }

        if let Some(inputs) = stage.get("inputs").or_else(|| stage.get("inputBindings")) {
            if !inputs.is_object() {
                return Err(DefinitionError::InvalidField {
                    field: format!("stages[{}].inputs", index),
                    expected: "a mapping",
                });
            }
        }
    }

    Ok(())
}

fn non_empty_str(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty())
}
