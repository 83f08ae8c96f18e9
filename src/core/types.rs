//! Shared types: recipe documents, the resolved recipe model, run modes and
//! run events.
//!
//! Documents use the PascalCase key names recipe authors write
//! (`Identifier`, `ParentRecipe`, `Input`, `Process`). Everything derives
//! Serialize/Deserialize so documents round-trip through YAML and JSON.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Dynamically typed environment value.
pub type Value = serde_json::Value;

/// Key a processor writes to request that the rest of the recipe is skipped.
pub const STOP_PROCESSING_KEY: &str = "stop_processing_recipe";

/// Processor that separates the cheap check phase from the expensive work.
pub const END_OF_CHECK_PHASE: &str = "EndOfCheckPhase";

// ============================================================================
// Recipe documents
// ============================================================================

/// A recipe or override document as written on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecipeDocument {
    /// Unique reverse-domain identifier
    pub identifier: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Oldest engine version able to run this recipe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_version: Option<String>,

    /// Identifier of the recipe this document builds on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_recipe: Option<String>,

    /// Input defaults (order-preserving)
    #[serde(default)]
    pub input: IndexMap<String, Value>,

    /// Process list or, for child documents, modifications to the parent's list
    #[serde(default)]
    pub process: Vec<ProcessEntry>,
}

/// One scheduled processor invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Step {
    /// Registered processor name
    pub processor: String,

    /// Per-step argument overrides
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub arguments: IndexMap<String, Value>,

    /// Free-form note, ignored by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Step {
    /// A step with no arguments.
    pub fn new(processor: &str) -> Self {
        Self {
            processor: processor.to_string(),
            arguments: IndexMap::new(),
            comment: None,
        }
    }

    /// Builder-style argument setter.
    pub fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.arguments.insert(key.to_string(), value);
        self
    }
}

/// An entry of a document's `Process` list.
///
/// Plain steps are appended. `Replace` and `Delete` target an existing step by
/// processor name; `Ordinal` (1-based) picks the occurrence when the name
/// appears more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessEntry {
    Replace {
        #[serde(rename = "Replace")]
        target: String,
        #[serde(rename = "Ordinal", default, skip_serializing_if = "Option::is_none")]
        ordinal: Option<u32>,
        #[serde(rename = "With")]
        with: Step,
    },
    Delete {
        #[serde(rename = "Delete")]
        target: String,
        #[serde(rename = "Ordinal", default, skip_serializing_if = "Option::is_none")]
        ordinal: Option<u32>,
    },
    Step(Step),
}

/// A document together with where it was found.
#[derive(Debug, Clone)]
pub struct LoadedRecipe {
    pub document: RecipeDocument,
    pub path: Option<PathBuf>,
}

// ============================================================================
// Resolved model
// ============================================================================

/// A fully flattened recipe: no parent references, one linear process list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeModel {
    /// Identifier of the child-most document
    pub identifier: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Highest MinimumVersion across the chain
    #[serde(default)]
    pub minimum_version: Option<String>,

    /// Ancestor identifiers, furthest first
    #[serde(default)]
    pub parents: Vec<String>,

    /// Merged input defaults, child keys win
    pub input: IndexMap<String, Value>,

    /// Execution order
    pub process: Vec<Step>,

    /// Files the chain was loaded from, furthest ancestor first
    #[serde(skip)]
    pub sources: Vec<PathBuf>,
}

impl RecipeModel {
    /// BLAKE3 fingerprint of the canonical JSON form. Source paths are not part
    /// of the fingerprint.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("blake3:{}", blake3::hash(json.as_bytes()).to_hex())
    }

    /// Path of the child-most document, if it came from a file.
    pub fn path(&self) -> Option<&PathBuf> {
        self.sources.last()
    }

    /// Whether the process list contains the check-phase marker.
    pub fn has_check_phase(&self) -> bool {
        self.process
            .iter()
            .any(|s| s.processor == END_OF_CHECK_PHASE)
    }
}

// ============================================================================
// Run mode
// ============================================================================

/// How far a run goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Execute every step
    #[default]
    Full,
    /// Stop after the check-phase marker
    Check,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Check => write!(f, "check"),
        }
    }
}

// ============================================================================
// Run events
// ============================================================================

/// Event appended to a recipe's JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        recipe: String,
        run_id: String,
        mode: RunMode,
        fingerprint: String,
        engine_version: String,
    },
    StepStarted {
        recipe: String,
        index: usize,
        processor: String,
    },
    StepCompleted {
        recipe: String,
        index: usize,
        processor: String,
        duration_seconds: f64,
        changed: Vec<String>,
    },
    StepFailed {
        recipe: String,
        index: usize,
        processor: String,
        error: String,
    },
    RunFinished {
        recipe: String,
        run_id: String,
        status: String,
        steps_executed: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

// ============================================================================
// Value helpers
// ============================================================================

/// Render a value for substitution into a string.
pub fn value_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Truthiness used for flags such as `stop_processing_recipe`.
pub fn is_truthy(val: &Value) -> bool {
    match val {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            let lower = s.trim().to_ascii_lowercase();
            !(lower.is_empty() || lower == "false" || lower == "no" || lower == "0")
        }
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Null => false,
    }
}
