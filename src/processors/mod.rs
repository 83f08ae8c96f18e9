//! Processors: the leaf units of work a recipe chains together.
//!
//! Each processor declares:
//! 1. Input variables (required or optional, optionally with a default)
//! 2. Output variables it writes back into the environment
//! 3. One `execute` entry point that reads through a [`ProcessorContext`]
//!
//! Processors are looked up by name in a [`ProcessorRegistry`]; there is no
//! dynamic discovery.

pub mod control;
pub mod file;
pub mod hasher;

use crate::core::env::Environment;
use crate::core::types::{value_to_string, Value};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Declared input of a processor.
#[derive(Debug, Clone)]
pub struct InputVariable {
    pub name: &'static str,
    pub required: bool,
    pub description: &'static str,
    /// Applied when an optional input is absent
    pub default: Option<Value>,
}

impl InputVariable {
    pub fn required(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            required: true,
            description,
            default: None,
        }
    }

    pub fn optional(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            required: false,
            description,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Declared output of a processor.
#[derive(Debug, Clone)]
pub struct OutputVariable {
    pub name: &'static str,
    pub description: &'static str,
}

impl OutputVariable {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self { name, description }
    }
}

/// Fatal condition raised by a processor's own logic.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("{0}")]
    Failed(String),

    #[error("input '{0}' is missing or has the wrong type")]
    MissingInput(String),

    #[error("invalid value for '{key}': {reason}")]
    InvalidInput { key: String, reason: String },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessorError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Control signal returned by a successful execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Skip the remaining steps; the run ends as Stopped
    Stop,
}

/// What one execution produced.
#[derive(Debug, Clone)]
pub struct StepEffects {
    pub flow: Flow,
    pub outputs: IndexMap<String, Value>,
    pub messages: Vec<String>,
    pub warnings: Vec<String>,
}

/// A processor's view of the run: step arguments layered over the
/// environment, plus a write buffer for its outputs.
///
/// Reads see, in order of precedence, values written during this execution,
/// the step's resolved arguments, then the environment.
pub struct ProcessorContext<'a> {
    env: &'a Environment,
    args: IndexMap<String, Value>,
    outputs: IndexMap<String, Value>,
    messages: Vec<String>,
    warnings: Vec<String>,
}

impl<'a> ProcessorContext<'a> {
    pub fn new(env: &'a Environment, args: IndexMap<String, Value>) -> Self {
        Self {
            env,
            args,
            outputs: IndexMap::new(),
            messages: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.outputs
            .get(key)
            .or_else(|| self.args.get(key))
            .or_else(|| self.env.get(key))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// A string input, failing when absent or not a string.
    pub fn require_str(&self, key: &str) -> Result<&str, ProcessorError> {
        self.get_str(key)
            .ok_or_else(|| ProcessorError::MissingInput(key.to_string()))
    }

    /// Any scalar input rendered as a string.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::Array(_) | Value::Object(_) => None,
            other => Some(value_to_string(other)),
        }
    }

    /// Write an output. Merged into the environment after the step succeeds.
    pub fn set(&mut self, key: &str, value: Value) {
        self.outputs.insert(key.to_string(), value);
    }

    /// Informational progress line.
    pub fn info(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Non-fatal warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn finish(self, flow: Flow) -> StepEffects {
        StepEffects {
            flow,
            outputs: self.outputs,
            messages: self.messages,
            warnings: self.warnings,
        }
    }
}

/// The contract every processing step implements.
pub trait Processor {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn input_variables(&self) -> Vec<InputVariable>;

    fn output_variables(&self) -> Vec<OutputVariable>;

    fn execute(&self, ctx: &mut ProcessorContext<'_>) -> Result<Flow, ProcessorError>;
}

/// Builds a fresh processor instance.
pub type ProcessorFactory = Box<dyn Fn() -> Box<dyn Processor> + Send + Sync>;

/// Name → factory mapping.
pub struct ProcessorRegistry {
    factories: BTreeMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry holding every built-in processor.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_default::<control::EndOfCheckPhase>();
        registry.register_default::<control::StopProcessingIf>();
        registry.register_default::<control::DeprecationWarning>();
        registry.register_default::<file::FileCreator>();
        registry.register_default::<file::PathDeleter>();
        registry.register_default::<hasher::FileHasher>();
        registry
    }

    /// Register a factory under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Processor> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Register a `Default`-constructible processor under its own name.
    pub fn register_default<P>(&mut self)
    where
        P: Processor + Default + 'static,
    {
        let name = P::default().name();
        self.register(name, || Box::new(P::default()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Construct a processor by name.
    pub fn create(&self, name: &str) -> Option<Box<dyn Processor>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
