//! Persistence layer: run snapshots and run history
//!
//! Every run ends with one immutable snapshot of its [`WorkflowState`]. The
//! run history is a small index of past runs used by the `history` command.

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunHistory;

use crate::core::{RunStatus, WorkflowState};
use crate::execution::RunReport;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Prefix of snapshot file names
pub const SNAPSHOT_PREFIX: &str = "workflow_results_";

/// Immutable record of one finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub workflow_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: RunStatus,

    /// Stage whose failure halted the run, if any
    pub halted_at: Option<String>,

    /// Stage id -> result, in execution order
    pub state: WorkflowState,
}

impl RunSnapshot {
    /// File name for this snapshot, keyed by completion time
    pub fn file_stem(&self) -> String {
        format!(
            "{}{}",
            SNAPSHOT_PREFIX,
            self.completed_at.format("%Y%m%d_%H%M%S")
        )
    }
}

/// Where a snapshot ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotLocation {
    File(PathBuf),
    Memory { index: usize },
}

impl fmt::Display for SnapshotLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotLocation::File(path) => write!(f, "{}", path.display()),
            SnapshotLocation::Memory { index } => write!(f, "memory #{}", index),
        }
    }
}

/// Trait for snapshot sinks
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot; never overwrites an earlier one
    async fn save_snapshot(&self, snapshot: &RunSnapshot) -> Result<SnapshotLocation>;
}

/// Writes `workflow_results_<YYYYMMDD_HHMMSS>.json` files into a directory
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    output_dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Load a snapshot written earlier
    pub async fn load(path: impl AsRef<Path>) -> Result<RunSnapshot> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))
    }
}

#[async_trait::async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save_snapshot(&self, snapshot: &RunSnapshot) -> Result<SnapshotLocation> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create output directory {}", self.output_dir.display()))?;

        let json = serde_json::to_vec_pretty(snapshot).context("Failed to serialize snapshot")?;
        let stem = snapshot.file_stem();

        // Two runs finishing within the same second get a numeric suffix
        let mut suffix = 0usize;
        loop {
            let name = if suffix == 0 {
                format!("{}.json", stem)
            } else {
                format!("{}_{}.json", stem, suffix)
            };
            let path = self.output_dir.join(name);

            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&json)
                        .await
                        .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
                    file.flush().await?;
                    return Ok(SnapshotLocation::File(path));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create snapshot {}", path.display()))
                }
            }
        }
    }
}

/// Keeps snapshots in memory (for testing or ephemeral use)
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<Vec<RunSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshots(&self) -> Vec<RunSnapshot> {
        self.snapshots.read().await.clone()
    }

    pub async fn latest(&self) -> Option<RunSnapshot> {
        self.snapshots.read().await.last().cloned()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save_snapshot(&self, snapshot: &RunSnapshot) -> Result<SnapshotLocation> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.push(snapshot.clone());
        Ok(SnapshotLocation::Memory {
            index: snapshots.len() - 1,
        })
    }
}

/// Summary of a run, as kept in the run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Workflow name
    pub workflow_name: String,

    /// Run status
    pub status: RunStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run completed
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of declared stages
    pub total_stages: usize,

    /// Number of stages that succeeded
    pub succeeded: usize,

    /// Number of stages that failed
    pub failed: usize,

    /// Where the snapshot was written
    pub snapshot: Option<String>,
}

/// Trait for run history backends
#[async_trait::async_trait]
pub trait RunHistory: Send + Sync {
    /// Record a finished run
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Runs of one workflow, newest first
    async fn list_runs(&self, workflow_name: &str) -> Result<Vec<RunSummary>>;

    /// Most recent runs across all workflows, newest first
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>>;

    /// All workflow names in the history
    async fn list_workflows(&self) -> Result<Vec<String>>;
}

/// In-memory run history (for testing or `--no-history`)
#[derive(Debug, Default)]
pub struct InMemoryRunHistory {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryRunHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(mut runs: Vec<RunSummary>) -> Vec<RunSummary> {
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs
}

#[async_trait::async_trait]
impl RunHistory for InMemoryRunHistory {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, workflow_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        Ok(newest_first(
            runs.values()
                .filter(|r| r.workflow_name == workflow_name)
                .cloned()
                .collect(),
        ))
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut all = newest_first(runs.values().cloned().collect());
        all.truncate(limit);
        Ok(all)
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.workflow_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a history entry from a run report
pub fn create_summary(report: &RunReport) -> RunSummary {
    RunSummary {
        run_id: report.run_id,
        workflow_name: report.workflow_name.clone(),
        status: report.status,
        started_at: report.started_at,
        completed_at: Some(report.completed_at),
        total_stages: report.total_stages,
        succeeded: report.succeeded,
        failed: report.failed,
        snapshot: Some(report.snapshot.to_string()),
    }
}
