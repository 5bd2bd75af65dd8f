//! Stage registry - maps stage type names to executor constructors

use crate::core::{DefinitionError, StageDescriptor};
use crate::stage::{StageError, StageExecutor, SubprocessStage};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Stage type for an arbitrary program given by the stage's `command`
pub const COMMAND_STAGE_TYPE: &str = "CommandStage";

/// Prefix of the default program name for built-in stage kinds
const PROGRAM_PREFIX: &str = "leadflow-stage-";

/// Constructor for one stage type
pub type StageFactory =
    Arc<dyn Fn(&StageDescriptor) -> Result<Arc<dyn StageExecutor>, StageError> + Send + Sync>;

/// The built-in lead-generation stage kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    ProspectSearch,
    DataEnrichment,
    Scoring,
    OutreachContent,
    OutreachExecutor,
    ResponseTracker,
    FeedbackTrainer,
}

impl StageKind {
    pub const ALL: [StageKind; 7] = [
        StageKind::ProspectSearch,
        StageKind::DataEnrichment,
        StageKind::Scoring,
        StageKind::OutreachContent,
        StageKind::OutreachExecutor,
        StageKind::ResponseTracker,
        StageKind::FeedbackTrainer,
    ];

    /// Stage type name as written in definitions
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::ProspectSearch => "ProspectSearchAgent",
            StageKind::DataEnrichment => "DataEnrichmentAgent",
            StageKind::Scoring => "ScoringAgent",
            StageKind::OutreachContent => "OutreachContentAgent",
            StageKind::OutreachExecutor => "OutreachExecutorAgent",
            StageKind::ResponseTracker => "ResponseTrackerAgent",
            StageKind::FeedbackTrainer => "FeedbackTrainerAgent",
        }
    }

    /// Program run when a stage of this kind has no `command`
    ///
    /// `ProspectSearchAgent` runs `leadflow-stage-prospect-search`.
    pub fn default_program(&self) -> String {
        let name = self.as_str().trim_end_matches("Agent");
        let mut program = String::from(PROGRAM_PREFIX);
        for (i, c) in name.chars().enumerate() {
            if c.is_ascii_uppercase() && i > 0 {
                program.push('-');
            }
            program.push(c.to_ascii_lowercase());
        }
        program
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown stage kind '{}'", s))
    }
}

/// Registry of stage constructors
///
/// Populated before a definition is built; read-only afterwards.
#[derive(Clone, Default)]
pub struct StageRegistry {
    factories: HashMap<String, StageFactory>,
}

impl StageRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every [`StageKind`] plus [`COMMAND_STAGE_TYPE`]
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        for kind in StageKind::ALL {
            let program = kind.default_program();
            registry.register(kind.as_str(), move |descriptor: &StageDescriptor| {
                let stage = SubprocessStage::from_descriptor(descriptor, Some(&program))?;
                Ok(Arc::new(stage) as Arc<dyn StageExecutor>)
            });
        }

        registry.register(COMMAND_STAGE_TYPE, |descriptor: &StageDescriptor| {
            let stage = SubprocessStage::from_descriptor(descriptor, None)?;
            Ok(Arc::new(stage) as Arc<dyn StageExecutor>)
        });

        registry
    }

    /// Register (or replace) the constructor for a stage type
    pub fn register<F>(&mut self, stage_type: impl Into<String>, factory: F)
    where
        F: Fn(&StageDescriptor) -> Result<Arc<dyn StageExecutor>, StageError> + Send + Sync + 'static,
    {
        self.factories.insert(stage_type.into(), Arc::new(factory));
    }

    pub fn contains(&self, stage_type: &str) -> bool {
        self.factories.contains_key(stage_type)
    }

    /// Construct the executor for one stage
    pub fn construct(&self, descriptor: &StageDescriptor) -> Result<Arc<dyn StageExecutor>, DefinitionError> {
        let factory = self
            .factories
            .get(&descriptor.stage_type)
            .ok_or_else(|| DefinitionError::UnknownStageType {
                stage_id: descriptor.id.clone(),
                stage_type: descriptor.stage_type.clone(),
            })?;

        factory(descriptor).map_err(|e| DefinitionError::Construction {
            stage_id: descriptor.id.clone(),
            message: e.to_string(),
        })
    }

    /// Registered stage types, sorted
    pub fn stage_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stage_types", &self.stage_types())
            .finish()
    }
}
