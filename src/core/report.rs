//! Run reports: per-step records, final status, and JSON receipts on disk.

use super::types::{RecipeModel, RunMode, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One environment key that a step added, changed or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarChange {
    pub key: String,
    #[serde(default)]
    pub before: Option<Value>,
    #[serde(default)]
    pub after: Option<Value>,
}

/// Text a step produced besides its outputs.
#[derive(Debug, Clone, Default)]
pub struct StepLog {
    pub messages: Vec<String>,
    pub warnings: Vec<String>,
    /// Keys written that the processor did not declare
    pub undeclared_outputs: Vec<String>,
}

/// Record of one completed step. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub processor: String,
    pub duration_seconds: f64,
    pub changes: Vec<VarChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub undeclared_outputs: Vec<String>,
    #[serde(default)]
    pub stop_requested: bool,
}

impl StepRecord {
    pub fn changed_keys(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.key.as_str()).collect()
    }
}

/// Why a run ended early without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A processor asked to skip the rest of the recipe
    Requested,
    /// Check mode reached the check-phase marker
    CheckPhaseEnded,
}

/// Category of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingRequiredInput,
    UnresolvedVariable,
    ProcessorError,
    Panicked,
}

/// Run state. Starts as `Running` and moves to exactly one terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Stopped {
        step_index: usize,
        processor: String,
        reason: StopReason,
    },
    Failed {
        step_index: usize,
        processor: String,
        kind: FailureKind,
        error: String,
    },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped { .. } => "stopped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Everything a caller needs to know about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub recipe: String,
    pub fingerprint: String,
    pub mode: RunMode,
    pub started_at: String,
    #[serde(default)]
    pub total_seconds: f64,
    steps: Vec<StepRecord>,
    status: RunStatus,
    /// Environment at the end of the run
    #[serde(default)]
    pub environment: IndexMap<String, Value>,
}

impl RunReport {
    pub fn new(run_id: &str, model: &RecipeModel, mode: RunMode, started_at: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            recipe: model.identifier.clone(),
            fingerprint: model.fingerprint(),
            mode,
            started_at: started_at.to_string(),
            total_seconds: 0.0,
            steps: Vec::new(),
            status: RunStatus::Running,
            environment: IndexMap::new(),
        }
    }

    /// Append a record for a step that finished successfully.
    pub fn record_step(
        &mut self,
        processor: &str,
        duration: Duration,
        before: &IndexMap<String, Value>,
        after: &IndexMap<String, Value>,
        log: StepLog,
        stopped: bool,
    ) -> &StepRecord {
        let index = self.steps.len();
        self.steps.push(StepRecord {
            index,
            processor: processor.to_string(),
            duration_seconds: duration.as_secs_f64(),
            changes: diff_vars(before, after),
            messages: log.messages,
            warnings: log.warnings,
            undeclared_outputs: log.undeclared_outputs,
            stop_requested: stopped,
        });
        &self.steps[index]
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn final_status(&self) -> &RunStatus {
        &self.status
    }

    /// Move to a terminal state. Later calls are ignored.
    pub fn finish(
        &mut self,
        status: RunStatus,
        environment: IndexMap<String, Value>,
        total: Duration,
    ) {
        if self.status.is_terminal() || !status.is_terminal() {
            return;
        }
        self.status = status;
        self.environment = environment;
        self.total_seconds = total.as_secs_f64();
    }

    /// Every warning raised during the run, in step order.
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .flat_map(|s| s.warnings.iter().map(String::as_str))
    }

    /// Process exit code: 0 for completed or stopped runs, 1 for failures,
    /// 2 when the very first step could not even be prepared.
    pub fn exit_code(&self) -> i32 {
        match &self.status {
            RunStatus::Running | RunStatus::Completed | RunStatus::Stopped { .. } => 0,
            RunStatus::Failed {
                step_index: 0,
                kind: FailureKind::MissingRequiredInput | FailureKind::UnresolvedVariable,
                ..
            } => 2,
            RunStatus::Failed { .. } => 1,
        }
    }
}

/// Keys whose value differs between two snapshots: additions and changes in
/// `after` order, then removals in `before` order.
pub fn diff_vars(before: &IndexMap<String, Value>, after: &IndexMap<String, Value>) -> Vec<VarChange> {
    let mut changes: Vec<VarChange> = after
        .iter()
        .filter(|(k, v)| before.get(*k) != Some(*v))
        .map(|(k, v)| VarChange {
            key: k.clone(),
            before: before.get(k).cloned(),
            after: Some(v.clone()),
        })
        .collect();
    changes.extend(
        before
            .iter()
            .filter(|(k, _)| !after.contains_key(*k))
            .map(|(k, v)| VarChange {
                key: k.clone(),
                before: Some(v.clone()),
                after: None,
            }),
    );
    changes
}

/// Receipt path for a run.
pub fn receipt_path(dir: &Path, report: &RunReport) -> PathBuf {
    dir.join("receipts")
        .join(format!("{}-receipt-{}.json", report.recipe, report.run_id))
}

/// Save a report as a pretty JSON receipt. Atomic: temp file + rename.
pub fn save_receipt(dir: &Path, report: &RunReport) -> Result<PathBuf, String> {
    let path = receipt_path(dir, report);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let json = serde_json::to_string_pretty(report)
        .map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path)
        .map_err(|e| format!("cannot rename {} → {}: {}", tmp_path.display(), path.display(), e))?;

    Ok(path)
}

/// Load a receipt written by [`save_receipt`].
pub fn load_receipt(path: &Path) -> Result<RunReport, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("invalid receipt {}: {}", path.display(), e))
}
