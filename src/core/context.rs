//! Resolution context - the read-only view bindings are resolved against

use crate::core::state::WorkflowState;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Source of environment variables
///
/// The process environment in production; a fixed map in tests so that
/// resolution never depends on (or mutates) the real environment.
pub trait Environment: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads from `std::env`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed set of variables
#[derive(Debug, Clone, Default)]
pub struct MapEnvironment {
    vars: HashMap<String, String>,
}

impl MapEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnvironment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl Environment for MapEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Everything a binding can read from at the moment a stage is about to run
///
/// Borrowed from the orchestrator for the duration of one stage's resolution;
/// stages never see it.
#[derive(Clone, Copy)]
pub struct ResolutionContext<'a> {
    /// Results of the stages that have already run
    pub state: &'a WorkflowState,

    /// The definition's `config` block
    pub config: &'a Map<String, Value>,

    /// Environment variable source
    pub env: &'a dyn Environment,

    /// Global dry-run flag, injected as the default `dry_run` input
    pub dry_run: bool,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(
        state: &'a WorkflowState,
        config: &'a Map<String, Value>,
        env: &'a dyn Environment,
        dry_run: bool,
    ) -> Self {
        Self {
            state,
            config,
            env,
            dry_run,
        }
    }
}
