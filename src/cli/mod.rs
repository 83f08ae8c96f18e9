//! CLI subcommands: run, info, list-recipes, list-processors,
//! processor-info, make-override.

use crate::core::config::{self, Preferences};
use crate::core::executor::{self, RunOptions};
use crate::core::recipe::DirectoryLoader;
use crate::core::report::{self, RunReport, RunStatus, StopReason};
use crate::core::resolver::{ResolveError, Resolver};
use crate::core::types::{value_to_string, RecipeDocument, RunMode, Value};
use crate::processors::ProcessorRegistry;
use clap::Subcommand;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one or more recipes in order
    Run {
        /// Recipe identifiers, names or file paths
        #[arg(required = true)]
        recipes: Vec<String>,

        /// Set a variable for every run (repeatable)
        #[arg(short = 'k', long = "key", value_name = "KEY=VALUE")]
        keys: Vec<String>,

        /// Stop each run after its check phase
        #[arg(long)]
        check: bool,

        /// Write a JSON receipt per run into this directory
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },

    /// Show a resolved recipe
    Info {
        /// Recipe identifier, name or file path
        recipe: String,
    },

    /// List discoverable recipes
    ListRecipes,

    /// List registered processors
    ListProcessors,

    /// Describe a processor's inputs and outputs
    ProcessorInfo {
        /// Processor name
        name: String,
    },

    /// Create an override for a recipe in the first override directory
    MakeOverride {
        /// Recipe identifier, name or file path
        recipe: String,

        /// File name for the override (default: the recipe's name)
        #[arg(short, long)]
        name: Option<String>,

        /// Overwrite an existing override
        #[arg(long)]
        force: bool,
    },
}

/// Command failure, carrying the process exit code.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Usage(String),

    #[error("{failed} of {total} recipe run(s) did not succeed")]
    RunsFailed { failed: usize, total: usize, code: i32 },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Resolve(_) => 2,
            Self::Config(_) | Self::Usage(_) => 1,
            Self::RunsFailed { code, .. } => *code,
        }
    }
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands, prefs: Option<&Path>) -> Result<(), CliError> {
    match cmd {
        Commands::Run {
            recipes,
            keys,
            check,
            report_dir,
        } => {
            let mode = if check { RunMode::Check } else { RunMode::Full };
            cmd_run(prefs, &recipes, &keys, mode, report_dir.as_deref())
        }
        Commands::Info { recipe } => cmd_info(prefs, &recipe),
        Commands::ListRecipes => cmd_list_recipes(prefs),
        Commands::ListProcessors => cmd_list_processors(),
        Commands::ProcessorInfo { name } => cmd_processor_info(&name),
        Commands::MakeOverride {
            recipe,
            name,
            force,
        } => cmd_make_override(prefs, &recipe, name.as_deref(), force),
    }
}

fn load_prefs(path: Option<&Path>) -> Result<Preferences, CliError> {
    config::load_preferences(path).map_err(CliError::Config)
}

fn loader_for(prefs: &Preferences) -> DirectoryLoader {
    DirectoryLoader::new(
        prefs.recipe_search_dirs.clone(),
        prefs.recipe_override_dirs.clone(),
    )
    .with_excluded(vec![prefs.cache_dir.clone()])
}

/// Parse `KEY=VALUE`. The value is kept as a string.
pub fn parse_key_value(raw: &str) -> Result<(String, Value), CliError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), Value::String(value.to_string())))
        }
        _ => Err(CliError::Usage(format!(
            "invalid variable '{}', expected KEY=VALUE",
            raw
        ))),
    }
}

fn cmd_run(
    prefs_path: Option<&Path>,
    recipes: &[String],
    keys: &[String],
    mode: RunMode,
    report_dir: Option<&Path>,
) -> Result<(), CliError> {
    let prefs = load_prefs(prefs_path)?;
    let mut variables = IndexMap::new();
    for raw in keys {
        let (k, v) = parse_key_value(raw)?;
        variables.insert(k, v);
    }

    let loader = loader_for(&prefs);
    let registry = ProcessorRegistry::with_builtins();
    let opts = RunOptions {
        mode,
        variables,
        base_variables: prefs.variables.clone(),
        cache_dir: Some(prefs.cache_dir.clone()),
        event_log: prefs.event_log,
    };

    let mut worst = 0;
    let mut failed = 0;
    for recipe in recipes {
        println!("Processing {}...", recipe);
        let code = match executor::run(&loader, &registry, recipe, &opts) {
            Ok(run_report) => {
                print_report(&run_report);
                if let Some(dir) = report_dir {
                    match report::save_receipt(dir, &run_report) {
                        Ok(path) => println!("  Receipt: {}", path.display()),
                        Err(e) => eprintln!("  WARNING: {}", e),
                    }
                }
                run_report.exit_code()
            }
            Err(e) => {
                eprintln!("  ERROR: {}", e);
                CliError::from(e).exit_code()
            }
        };
        if code != 0 {
            failed += 1;
        }
        worst = worst.max(code);
    }

    if worst == 0 {
        return Ok(());
    }
    Err(CliError::RunsFailed {
        failed,
        total: recipes.len(),
        code: worst,
    })
}

/// Per-step summary and final status.
fn print_report(report: &RunReport) {
    for step in report.steps() {
        println!(
            "  [{}] {} ({:.2}s)",
            step.index, step.processor, step.duration_seconds
        );
        for change in &step.changes {
            match change.after {
                Some(ref after) => println!("      {} = {}", change.key, display_value(after)),
                None => println!("      {} removed", change.key),
            }
        }
        for warning in &step.warnings {
            println!("      WARNING: {}", warning);
        }
    }

    println!("{}", status_line(report));
}

/// One-line summary of a report's final status.
fn status_line(report: &RunReport) -> String {
    match report.final_status() {
        RunStatus::Running => format!("{}: still running", report.recipe),
        RunStatus::Completed => format!(
            "{}: completed ({} steps, {:.1}s)",
            report.recipe,
            report.steps().len(),
            report.total_seconds
        ),
        RunStatus::Stopped {
            step_index,
            processor,
            reason,
        } => {
            let why = match reason {
                StopReason::Requested => "stop requested",
                StopReason::CheckPhaseEnded => "check phase ended",
            };
            format!(
                "{}: stopped at step {} ({}): {}",
                report.recipe, step_index, processor, why
            )
        }
        RunStatus::Failed {
            step_index,
            processor,
            error,
            ..
        } => format!(
            "{}: FAILED at step {} ({}): {}",
            report.recipe, step_index, processor, error
        ),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cmd_info(prefs_path: Option<&Path>, recipe: &str) -> Result<(), CliError> {
    let prefs = load_prefs(prefs_path)?;
    let loader = loader_for(&prefs);
    let registry = ProcessorRegistry::with_builtins();
    let model = Resolver::new(&loader).resolve(recipe)?;

    println!("Identifier:  {}", model.identifier);
    if let Some(ref description) = model.description {
        println!("Description: {}", description);
    }
    if let Some(ref version) = model.minimum_version {
        println!("Minimum version: {}", version);
    }
    if !model.parents.is_empty() {
        println!("Parents:     {}", model.parents.join(" -> "));
    }
    for source in &model.sources {
        println!("Source:      {}", source.display());
    }
    println!("Fingerprint: {}", model.fingerprint());

    println!("Input:");
    for (key, value) in &model.input {
        println!("  {} = {}", key, value_to_string(value));
    }
    println!("Process:");
    for (i, step) in model.process.iter().enumerate() {
        let marker = if registry.contains(&step.processor) {
            ""
        } else {
            "  (not registered)"
        };
        println!("  [{}] {}{}", i, step.processor, marker);
        for (key, value) in &step.arguments {
            println!("      {}: {}", key, display_value(value));
        }
    }
    Ok(())
}

fn cmd_list_recipes(prefs_path: Option<&Path>) -> Result<(), CliError> {
    let prefs = load_prefs(prefs_path)?;
    let loader = loader_for(&prefs);
    let listings = loader.list();
    if listings.is_empty() {
        println!("No recipes found.");
        return Ok(());
    }
    for listing in listings {
        let tag = if listing.is_override { "  (override)" } else { "" };
        println!("{:<40} {}{}", listing.name, listing.identifier, tag);
    }
    Ok(())
}

fn cmd_list_processors() -> Result<(), CliError> {
    let registry = ProcessorRegistry::with_builtins();
    for name in registry.names() {
        println!("{}", name);
    }
    Ok(())
}

fn cmd_processor_info(name: &str) -> Result<(), CliError> {
    let registry = ProcessorRegistry::with_builtins();
    let processor = registry
        .create(name)
        .ok_or_else(|| CliError::Usage(format!("unknown processor '{}'", name)))?;

    println!("{}", processor.name());
    println!("  {}", processor.description());
    println!("Input variables:");
    for input in processor.input_variables() {
        let req = if input.required { "required" } else { "optional" };
        match input.default {
            Some(ref default) => println!(
                "  {} ({}, default: {}): {}",
                input.name,
                req,
                display_value(default),
                input.description
            ),
            None => println!("  {} ({}): {}", input.name, req, input.description),
        }
    }
    println!("Output variables:");
    for output in processor.output_variables() {
        println!("  {}: {}", output.name, output.description);
    }
    Ok(())
}

fn cmd_make_override(
    prefs_path: Option<&Path>,
    recipe: &str,
    name: Option<&str>,
    force: bool,
) -> Result<(), CliError> {
    let prefs = load_prefs(prefs_path)?;
    let loader = loader_for(&prefs);
    let model = Resolver::new(&loader).resolve(recipe)?;

    let dir = prefs
        .recipe_override_dirs
        .first()
        .ok_or_else(|| CliError::Config("no recipe_override_dirs configured".to_string()))?;
    let name = match name {
        Some(n) => n.to_string(),
        None => loader
            .list()
            .iter()
            .find(|l| !l.is_override && l.identifier == model.identifier)
            .map(|l| l.name.clone())
            .unwrap_or_else(|| model.identifier.clone()),
    };
    let path = dir.join(format!("{}.recipe.yaml", name));
    if path.exists() && !force {
        return Err(CliError::Usage(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    let doc = RecipeDocument {
        identifier: format!("local.{}", model.identifier),
        description: None,
        minimum_version: None,
        parent_recipe: Some(model.identifier.clone()),
        input: model.input.clone(),
        process: Vec::new(),
    };
    let yaml = serde_yaml_ng::to_string(&doc)
        .map_err(|e| CliError::Config(format!("serialize error: {}", e)))?;
    std::fs::create_dir_all(dir)
        .map_err(|e| CliError::Config(format!("cannot create {}: {}", dir.display(), e)))?;
    std::fs::write(&path, yaml)
        .map_err(|e| CliError::Config(format!("cannot write {}: {}", path.display(), e)))?;

    println!("Override for {} written to {}", model.identifier, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_document_file;

    struct Workspace {
        dir: tempfile::TempDir,
        prefs: PathBuf,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            std::fs::create_dir_all(root.join("recipes")).unwrap();
            let prefs = root.join("autopkg.toml");
            std::fs::write(
                &prefs,
                format!(
                    "recipe_search_dirs = [{:?}]\nrecipe_override_dirs = [{:?}]\ncache_dir = {:?}\n\n[variables]\nOUT_DIR = {:?}\n",
                    root.join("recipes").display().to_string(),
                    root.join("overrides").display().to_string(),
                    root.join("cache").display().to_string(),
                    root.display().to_string(),
                ),
            )
            .unwrap();
            Self { dir, prefs }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn prefs(&self) -> Option<&Path> {
            Some(self.prefs.as_path())
        }

        fn recipe(&self, file: &str, yaml: &str) {
            std::fs::write(self.root().join("recipes").join(file), yaml).unwrap();
        }
    }

    const WRITER: &str = r#"
Identifier: com.example.Writer
Input:
  NAME: Foo
Process:
  - Processor: FileCreator
    Arguments:
      file_path: "%OUT_DIR%/%NAME%.txt"
      file_content: "hello %NAME%"
  - Processor: EndOfCheckPhase
  - Processor: FileHasher
    Arguments:
      path: "%OUT_DIR%/%NAME%.txt"
"#;

    #[test]
    fn test_parse_key_value() {
        let (k, v) = parse_key_value("NAME=Foo=Bar").unwrap();
        assert_eq!(k, "NAME");
        assert_eq!(v, Value::String("Foo=Bar".to_string()));
        let (_, empty) = parse_key_value("EMPTY=").unwrap();
        assert_eq!(empty, Value::String(String::new()));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_cli_error_exit_codes() {
        let resolve = CliError::from(ResolveError::RecipeNotFound {
            identifier: "x".to_string(),
        });
        assert_eq!(resolve.exit_code(), 2);
        assert_eq!(CliError::Usage("u".to_string()).exit_code(), 1);
        let runs = CliError::RunsFailed {
            failed: 1,
            total: 2,
            code: 1,
        };
        assert_eq!(runs.exit_code(), 1);
        assert_eq!(runs.to_string(), "1 of 2 recipe run(s) did not succeed");
    }

    #[test]
    fn test_run_recipe_by_name() {
        let ws = Workspace::new();
        ws.recipe("Writer.recipe.yaml", WRITER);
        cmd_run(ws.prefs(), &["Writer".to_string()], &[], RunMode::Full, None).unwrap();
        assert_eq!(
            std::fs::read_to_string(ws.root().join("Foo.txt")).unwrap(),
            "hello Foo"
        );
        assert!(ws.root().join("cache/com.example.Writer/events.jsonl").exists());
    }

    #[test]
    fn test_run_with_key_override_and_receipt() {
        let ws = Workspace::new();
        ws.recipe("Writer.recipe.yaml", WRITER);
        let receipts = ws.root().join("reports");
        cmd_run(
            ws.prefs(),
            &["com.example.Writer".to_string()],
            &["NAME=Bar".to_string()],
            RunMode::Full,
            Some(&receipts),
        )
        .unwrap();
        assert!(ws.root().join("Bar.txt").exists());
        let entries: Vec<_> = std::fs::read_dir(receipts.join("receipts"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
        let loaded = report::load_receipt(&entries[0].path()).unwrap();
        assert_eq!(loaded.final_status(), &RunStatus::Completed);
        assert!(loaded.environment["file_hash"]
            .as_str()
            .unwrap()
            .starts_with("blake3:"));
    }

    #[test]
    fn test_run_check_mode() {
        let ws = Workspace::new();
        ws.recipe("Writer.recipe.yaml", WRITER);
        let receipts = ws.root().join("reports");
        cmd_run(
            ws.prefs(),
            &["Writer".to_string()],
            &[],
            RunMode::Check,
            Some(&receipts),
        )
        .unwrap();
        let entry = std::fs::read_dir(receipts.join("receipts"))
            .unwrap()
            .filter_map(|e| e.ok())
            .next()
            .unwrap();
        let loaded = report::load_receipt(&entry.path()).unwrap();
        assert_eq!(loaded.steps().len(), 2);
        assert!(!loaded.environment.contains_key("file_hash"));
    }

    #[test]
    fn test_run_failure_exit_code() {
        let ws = Workspace::new();
        ws.recipe(
            "Cleanup.recipe.yaml",
            r#"
Identifier: com.example.Cleanup
Process:
  - Processor: EndOfCheckPhase
  - Processor: PathDeleter
    Arguments:
      path_list: ["%OUT_DIR%/does-not-exist"]
"#,
        );
        let err = cmd_run(ws.prefs(), &["Cleanup".to_string()], &[], RunMode::Full, None)
            .unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_run_batch_worst_exit_code() {
        let ws = Workspace::new();
        ws.recipe("Writer.recipe.yaml", WRITER);
        let err = cmd_run(
            ws.prefs(),
            &["Writer".to_string(), "Missing".to_string()],
            &[],
            RunMode::Full,
            None,
        )
        .unwrap_err();
        match err {
            CliError::RunsFailed {
                failed,
                total,
                code,
            } => {
                assert_eq!((failed, total, code), (1, 2, 2));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(ws.root().join("Foo.txt").exists());
    }

    #[test]
    fn test_run_invalid_key() {
        let ws = Workspace::new();
        let err = cmd_run(
            ws.prefs(),
            &["Writer".to_string()],
            &["oops".to_string()],
            RunMode::Full,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));
    }

    #[test]
    fn test_info_and_missing_recipe() {
        let ws = Workspace::new();
        ws.recipe("Writer.recipe.yaml", WRITER);
        cmd_info(ws.prefs(), "Writer").unwrap();
        let err = cmd_info(ws.prefs(), "Nope").unwrap_err();
        assert!(matches!(
            err,
            CliError::Resolve(ResolveError::RecipeNotFound { .. })
        ));
    }

    #[test]
    fn test_list_commands() {
        let ws = Workspace::new();
        ws.recipe("Writer.recipe.yaml", WRITER);
        cmd_list_recipes(ws.prefs()).unwrap();
        cmd_list_processors().unwrap();
        cmd_processor_info("FileCreator").unwrap();
        assert!(matches!(
            cmd_processor_info("NoSuchProcessor"),
            Err(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_make_override_and_run_it() {
        let ws = Workspace::new();
        ws.recipe("Writer.recipe.yaml", WRITER);
        cmd_make_override(ws.prefs(), "Writer", None, false).unwrap();

        let path = ws.root().join("overrides/Writer.recipe.yaml");
        let doc = parse_document_file(&path).unwrap();
        assert_eq!(doc.identifier, "local.com.example.Writer");
        assert_eq!(doc.parent_recipe.as_deref(), Some("com.example.Writer"));
        assert_eq!(doc.input["NAME"], Value::String("Foo".to_string()));

        let edited = std::fs::read_to_string(&path)
            .unwrap()
            .replace("NAME: Foo", "NAME: Local");
        std::fs::write(&path, edited).unwrap();
        cmd_run(ws.prefs(), &["Writer".to_string()], &[], RunMode::Full, None).unwrap();
        assert!(ws.root().join("Local.txt").exists());

        let err = cmd_make_override(ws.prefs(), "com.example.Writer", None, false).unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));
        cmd_make_override(ws.prefs(), "com.example.Writer", None, true).unwrap();
    }

    #[test]
    fn test_status_line_labels_each_state() {
        use crate::core::parser::parse_document;
        use crate::core::recipe::MemoryLoader;
        let loader = MemoryLoader::new()
            .with(parse_document("Identifier: t.status\nProcess: []\n").unwrap());
        let model = Resolver::new(&loader).resolve("t.status").unwrap();
        let mut report = RunReport::new("r-1", &model, RunMode::Full, "2026-01-01T00:00:00Z");
        assert_eq!(status_line(&report), "t.status: still running");

        report.finish(
            RunStatus::Stopped {
                step_index: 0,
                processor: "EndOfCheckPhase".to_string(),
                reason: StopReason::CheckPhaseEnded,
            },
            IndexMap::new(),
            std::time::Duration::from_millis(500),
        );
        assert_eq!(
            status_line(&report),
            "t.status: stopped at step 0 (EndOfCheckPhase): check phase ended"
        );
    }

    #[test]
    fn test_dispatch_list_processors() {
        dispatch(Commands::ListProcessors, None).unwrap();
    }
}
