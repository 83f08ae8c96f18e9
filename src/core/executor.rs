//! Executor: runs a resolved recipe's process list against one Environment.
//!
//! resolve → prepare (registry lookup per step) → seed env → for each step:
//! resolve args → check inputs → execute → merge outputs → record → events
//!
//! Steps run strictly in order. The run ends at the first failure, at the
//! first stop request, or, in check mode, right after the check-phase marker.

use super::env::{EnvError, Environment};
use super::eventlog;
use super::recipe::RecipeLoader;
use super::report::{FailureKind, RunReport, RunStatus, StepLog, StopReason};
use super::resolver::{ResolveError, Resolver};
use super::types::{
    is_truthy, RecipeModel, RunEvent, RunMode, Step, Value, END_OF_CHECK_PHASE,
    STOP_PROCESSING_KEY,
};
use super::ENGINE_VERSION;
use crate::processors::{Flow, Processor, ProcessorContext, ProcessorError, ProcessorRegistry, StepEffects};
use indexmap::IndexMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

/// Options for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Caller variables; override recipe Input
    pub variables: IndexMap<String, Value>,
    /// Preference variables; overridden by recipe Input
    pub base_variables: IndexMap<String, Value>,
    /// Root for per-recipe cache directories and event logs
    pub cache_dir: Option<PathBuf>,
    pub event_log: bool,
}

/// A step failure, wrapped with the processor it happened in.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{processor}: missing required input '{key}'")]
    MissingRequiredInput { processor: String, key: String },

    #[error("{processor}: argument '{argument}': {source}")]
    UnresolvedVariable {
        processor: String,
        argument: String,
        #[source]
        source: EnvError,
    },

    #[error("{processor}: {source}")]
    Execution {
        processor: String,
        #[source]
        source: ProcessorError,
    },

    #[error("{processor} panicked: {message}")]
    Panicked { processor: String, message: String },
}

impl StepError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MissingRequiredInput { .. } => FailureKind::MissingRequiredInput,
            Self::UnresolvedVariable { .. } => FailureKind::UnresolvedVariable,
            Self::Execution { .. } => FailureKind::ProcessorError,
            Self::Panicked { .. } => FailureKind::Panicked,
        }
    }
}

/// Runs resolved recipes with processors from a registry.
pub struct Executor<'a> {
    registry: &'a ProcessorRegistry,
}

impl<'a> Executor<'a> {
    pub fn new(registry: &'a ProcessorRegistry) -> Self {
        Self { registry }
    }

    /// Instantiate a processor for every step, failing before anything runs
    /// if one is not registered.
    pub fn prepare(&self, model: &RecipeModel) -> Result<Vec<Box<dyn Processor>>, ResolveError> {
        model
            .process
            .iter()
            .enumerate()
            .map(|(index, step)| {
                self.registry
                    .create(&step.processor)
                    .ok_or_else(|| ResolveError::ProcessorNotRegistered {
                        recipe: model.identifier.clone(),
                        index,
                        processor: step.processor.clone(),
                    })
            })
            .collect()
    }

    /// Execute a resolved model. Only preparation can fail; everything after
    /// that is reported through the returned [`RunReport`].
    pub fn execute(&self, model: &RecipeModel, opts: &RunOptions) -> Result<RunReport, ResolveError> {
        let processors = self.prepare(model)?;
        let started = Instant::now();
        let run_id = eventlog::generate_run_id();
        let log = EventSink::new(opts, &model.identifier);
        let mut report = RunReport::new(&run_id, model, opts.mode, &eventlog::now_iso8601());
        let mut env = seed_environment(model, opts);

        info!(
            recipe = %model.identifier,
            run_id = %run_id,
            mode = %opts.mode,
            steps = model.process.len(),
            "starting run"
        );
        if opts.mode == RunMode::Check && !model.has_check_phase() {
            warn!(
                recipe = %model.identifier,
                "check mode requested but recipe has no {} step; running to completion",
                END_OF_CHECK_PHASE
            );
        }
        log.emit(RunEvent::RunStarted {
            recipe: model.identifier.clone(),
            run_id: run_id.clone(),
            mode: opts.mode,
            fingerprint: report.fingerprint.clone(),
            engine_version: ENGINE_VERSION.to_string(),
        });

        let mut status = RunStatus::Completed;
        for (index, (step, processor)) in model.process.iter().zip(&processors).enumerate() {
            let _span = info_span!("step", index, processor = %step.processor).entered();
            log.emit(RunEvent::StepStarted {
                recipe: model.identifier.clone(),
                index,
                processor: step.processor.clone(),
            });

            let step_start = Instant::now();
            let effects = match run_step(step, processor.as_ref(), &env) {
                Ok(effects) => effects,
                Err(e) => {
                    error!("step {} failed: {}", index, e);
                    log.emit(RunEvent::StepFailed {
                        recipe: model.identifier.clone(),
                        index,
                        processor: step.processor.clone(),
                        error: e.to_string(),
                    });
                    status = RunStatus::Failed {
                        step_index: index,
                        processor: step.processor.clone(),
                        kind: e.kind(),
                        error: e.to_string(),
                    };
                    break;
                }
            };

            let stop_requested = effects.flow == Flow::Stop
                || effects.outputs.get(STOP_PROCESSING_KEY).is_some_and(is_truthy);
            let undeclared = undeclared_outputs(processor.as_ref(), &effects);
            for key in &undeclared {
                warn!(key = %key, "processor wrote an undeclared output");
            }
            for message in &effects.messages {
                info!("{}", message);
            }
            for warning in &effects.warnings {
                warn!("{}", warning);
            }

            let before = env.snapshot();
            for (key, value) in effects.outputs {
                env.set(&key, value);
            }
            let record = report.record_step(
                &step.processor,
                step_start.elapsed(),
                &before,
                &env.snapshot(),
                StepLog {
                    messages: effects.messages,
                    warnings: effects.warnings,
                    undeclared_outputs: undeclared,
                },
                stop_requested,
            );
            debug!(changed = ?record.changed_keys(), "step completed");
            log.emit(RunEvent::StepCompleted {
                recipe: model.identifier.clone(),
                index,
                processor: step.processor.clone(),
                duration_seconds: record.duration_seconds,
                changed: record.changed_keys().into_iter().map(String::from).collect(),
            });

            if stop_requested {
                info!("stop requested, skipping remaining steps");
                status = RunStatus::Stopped {
                    step_index: index,
                    processor: step.processor.clone(),
                    reason: StopReason::Requested,
                };
                break;
            }
            if opts.mode == RunMode::Check && step.processor == END_OF_CHECK_PHASE {
                info!("check phase complete");
                status = RunStatus::Stopped {
                    step_index: index,
                    processor: step.processor.clone(),
                    reason: StopReason::CheckPhaseEnded,
                };
                break;
            }
        }

        report.finish(status, env.snapshot(), started.elapsed());
        info!(
            recipe = %model.identifier,
            status = report.final_status().label(),
            steps = report.steps().len(),
            "run finished"
        );
        log.emit(RunEvent::RunFinished {
            recipe: model.identifier.clone(),
            run_id,
            status: report.final_status().label().to_string(),
            steps_executed: u32::try_from(report.steps().len()).unwrap_or(u32::MAX),
            total_seconds: report.total_seconds,
        });
        Ok(report)
    }
}

/// Resolve `identifier` through `loader` and run it.
pub fn run(
    loader: &dyn RecipeLoader,
    registry: &ProcessorRegistry,
    identifier: &str,
    opts: &RunOptions,
) -> Result<RunReport, ResolveError> {
    let model = Resolver::new(loader).resolve(identifier)?;
    Executor::new(registry).execute(&model, opts)
}

/// Build the initial environment: preference variables, then recipe Input,
/// then caller variables, then built-ins.
pub fn seed_environment(model: &RecipeModel, opts: &RunOptions) -> Environment {
    let mut env = Environment::new();
    env.extend(&opts.base_variables);
    env.extend(&model.input);
    env.extend(&opts.variables);

    env.set("RECIPE_IDENTIFIER", Value::String(model.identifier.clone()));
    env.set(
        "PARENT_RECIPES",
        Value::Array(model.parents.iter().cloned().map(Value::String).collect()),
    );
    if let Some(path) = model.path() {
        env.set("RECIPE_PATH", Value::String(path.display().to_string()));
        if let Some(dir) = path.parent() {
            env.set("RECIPE_DIR", Value::String(dir.display().to_string()));
        }
    }
    if let Some(ref cache) = opts.cache_dir {
        let dir = cache.join(&model.identifier);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), "cannot create recipe cache dir: {}", e);
        }
        env.set("RECIPE_CACHE_DIR", Value::String(dir.display().to_string()));
    }
    env
}

fn run_step(step: &Step, processor: &dyn Processor, env: &Environment) -> Result<StepEffects, StepError> {
    let name = &step.processor;

    let mut args = IndexMap::with_capacity(step.arguments.len());
    for (key, value) in &step.arguments {
        let resolved = env
            .resolve_value(value)
            .map_err(|source| StepError::UnresolvedVariable {
                processor: name.clone(),
                argument: key.clone(),
                source,
            })?;
        args.insert(key.clone(), resolved);
    }

    for input in processor.input_variables() {
        if args.contains_key(input.name) {
            continue;
        }
        if let Some(value) = env.get(input.name) {
            let resolved = env
                .resolve_value(value)
                .map_err(|source| StepError::UnresolvedVariable {
                    processor: name.clone(),
                    argument: input.name.to_string(),
                    source,
                })?;
            args.insert(input.name.to_string(), resolved);
            continue;
        }
        match input.default {
            Some(default) => {
                args.insert(input.name.to_string(), default);
            }
            None if input.required => {
                return Err(StepError::MissingRequiredInput {
                    processor: name.clone(),
                    key: input.name.to_string(),
                });
            }
            None => {}
        }
    }

    let mut ctx = ProcessorContext::new(env, args);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| processor.execute(&mut ctx)));
    match outcome {
        Ok(Ok(flow)) => Ok(ctx.finish(flow)),
        Ok(Err(source)) => Err(StepError::Execution {
            processor: name.clone(),
            source,
        }),
        Err(payload) => Err(StepError::Panicked {
            processor: name.clone(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn undeclared_outputs(processor: &dyn Processor, effects: &StepEffects) -> Vec<String> {
    let declared: Vec<&'static str> = processor
        .output_variables()
        .into_iter()
        .map(|o| o.name)
        .collect();
    effects
        .outputs
        .keys()
        .filter(|k| k.as_str() != STOP_PROCESSING_KEY && !declared.contains(&k.as_str()))
        .cloned()
        .collect()
}

/// Event log writer for one run. Write failures are logged and ignored.
struct EventSink<'a> {
    target: Option<&'a Path>,
    recipe: &'a str,
}

impl<'a> EventSink<'a> {
    fn new(opts: &'a RunOptions, recipe: &'a str) -> Self {
        let target = match opts.cache_dir {
            Some(ref dir) if opts.event_log => Some(dir.as_path()),
            _ => None,
        };
        Self { target, recipe }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(dir) = self.target {
            if let Err(e) = eventlog::append_event(dir, self.recipe, event) {
                warn!("cannot append run event: {}", e);
            }
        }
    }
}
