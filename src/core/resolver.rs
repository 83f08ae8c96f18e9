//! Override resolution: flattens a recipe's parent chain and any explicit
//! override layers into one [`RecipeModel`].
//!
//! Resolution is depth-first. The furthest ancestor supplies the base process
//! list; each child document then merges its Input (child keys win) and
//! applies its Process entries in order: plain steps append, `Replace` and
//! `Delete` edit a step located by processor name and 1-based ordinal. Nothing
//! depends on directory iteration order, so identical inputs always yield an
//! identical model.

use super::parser::{self, compare_versions, parse_version};
use super::recipe::RecipeLoader;
use super::types::{ProcessEntry, RecipeDocument, RecipeModel, Step};
use super::ENGINE_VERSION;
use std::cmp::Ordering;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Resolution-time failures. None of these ever happen after a step ran.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("recipe not found: {identifier}")]
    RecipeNotFound { identifier: String },

    #[error("cyclic recipe chain: {}", .chain.join(" -> "))]
    CyclicRecipeChain { chain: Vec<String> },

    #[error("invalid recipe '{identifier}': {message}")]
    InvalidRecipe { identifier: String, message: String },

    #[error("recipe '{identifier}' requires engine version {required} (this is {current})")]
    IncompatibleVersion {
        identifier: String,
        required: String,
        current: String,
    },

    #[error(
        "{op} in '{identifier}': processor '{target}' appears {count} times, an Ordinal is required"
    )]
    AmbiguousStepTarget {
        identifier: String,
        op: &'static str,
        target: String,
        count: usize,
    },

    #[error("{op} in '{identifier}': no step '{target}'{}", .ordinal.map(|n| format!(" with Ordinal {}", n)).unwrap_or_default())]
    StepTargetNotFound {
        identifier: String,
        op: &'static str,
        target: String,
        ordinal: Option<u32>,
    },

    #[error("override '{identifier}' declares parent '{declared}' but is layered on '{actual}'")]
    OverrideParentMismatch {
        identifier: String,
        declared: String,
        actual: String,
    },

    #[error("step {index} of '{recipe}' uses processor '{processor}', which is not registered")]
    ProcessorNotRegistered {
        recipe: String,
        index: usize,
        processor: String,
    },
}

/// Resolves identifiers against a loader.
pub struct Resolver<'a> {
    loader: &'a dyn RecipeLoader,
}

impl<'a> Resolver<'a> {
    pub fn new(loader: &'a dyn RecipeLoader) -> Self {
        Self { loader }
    }

    /// Resolve an identifier by following its ParentRecipe chain.
    pub fn resolve(&self, identifier: &str) -> Result<RecipeModel, ResolveError> {
        self.resolve_layered(identifier, &[])
    }

    /// Resolve an identifier, then apply explicit override layers in order.
    pub fn resolve_layered(
        &self,
        identifier: &str,
        layers: &[RecipeDocument],
    ) -> Result<RecipeModel, ResolveError> {
        let mut visiting = Vec::new();
        let mut model = self.resolve_chain(identifier, &mut visiting)?;

        for layer in layers {
            check_document(layer)?;
            if let Some(ref declared) = layer.parent_recipe {
                if declared != &model.identifier {
                    return Err(ResolveError::OverrideParentMismatch {
                        identifier: layer.identifier.clone(),
                        declared: declared.clone(),
                        actual: model.identifier.clone(),
                    });
                }
            }
            if layer.identifier == model.identifier || model.parents.contains(&layer.identifier) {
                let mut chain = model.parents.clone();
                chain.push(model.identifier.clone());
                chain.push(layer.identifier.clone());
                return Err(ResolveError::CyclicRecipeChain { chain });
            }
            model = apply_document(model, layer, None)?;
        }

        check_minimum_version(&model)?;
        debug!(
            identifier = %model.identifier,
            parents = model.parents.len(),
            steps = model.process.len(),
            "resolved recipe"
        );
        Ok(model)
    }

    fn resolve_chain(
        &self,
        identifier: &str,
        visiting: &mut Vec<String>,
    ) -> Result<RecipeModel, ResolveError> {
        if visiting.iter().any(|v| v == identifier) {
            let mut chain = visiting.clone();
            chain.push(identifier.to_string());
            return Err(ResolveError::CyclicRecipeChain { chain });
        }

        let loaded = self
            .loader
            .load(identifier)?
            .ok_or_else(|| ResolveError::RecipeNotFound {
                identifier: identifier.to_string(),
            })?;
        let doc = &loaded.document;

        if doc.identifier != identifier && visiting.iter().any(|v| v == &doc.identifier) {
            let mut chain = visiting.clone();
            chain.push(doc.identifier.clone());
            return Err(ResolveError::CyclicRecipeChain { chain });
        }
        check_document(doc)?;

        match doc.parent_recipe {
            None => root_model(doc, loaded.path.clone()),
            Some(ref parent) => {
                visiting.push(doc.identifier.clone());
                let base = self.resolve_chain(parent, visiting)?;
                visiting.pop();
                apply_document(base, doc, loaded.path.clone())
            }
        }
    }
}

fn check_document(doc: &RecipeDocument) -> Result<(), ResolveError> {
    let errors = parser::validate_document(doc);
    if errors.is_empty() {
        return Ok(());
    }
    Err(ResolveError::InvalidRecipe {
        identifier: doc.identifier.clone(),
        message: errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; "),
    })
}

fn check_minimum_version(model: &RecipeModel) -> Result<(), ResolveError> {
    let Some(ref required) = model.minimum_version else {
        return Ok(());
    };
    let (Some(req), Some(cur)) = (parse_version(required), parse_version(ENGINE_VERSION)) else {
        return Ok(());
    };
    if compare_versions(&req, &cur) == Ordering::Greater {
        return Err(ResolveError::IncompatibleVersion {
            identifier: model.identifier.clone(),
            required: required.clone(),
            current: ENGINE_VERSION.to_string(),
        });
    }
    Ok(())
}

/// Build the model for a document without a parent.
fn root_model(doc: &RecipeDocument, path: Option<PathBuf>) -> Result<RecipeModel, ResolveError> {
    let base = RecipeModel {
        identifier: doc.identifier.clone(),
        description: None,
        minimum_version: None,
        parents: Vec::new(),
        input: Default::default(),
        process: Vec::new(),
        sources: Vec::new(),
    };
    let mut model = apply_document(base, doc, path)?;
    model.parents.clear();
    Ok(model)
}

/// Layer `doc` on top of `base`.
pub fn apply_document(
    base: RecipeModel,
    doc: &RecipeDocument,
    path: Option<PathBuf>,
) -> Result<RecipeModel, ResolveError> {
    let RecipeModel {
        identifier: base_id,
        description,
        minimum_version,
        mut parents,
        mut input,
        mut process,
        mut sources,
    } = base;

    parents.push(base_id);
    for (k, v) in &doc.input {
        input.insert(k.clone(), v.clone());
    }
    for entry in &doc.process {
        apply_entry(&mut process, &doc.identifier, entry)?;
    }
    if let Some(p) = path {
        sources.push(p);
    }

    Ok(RecipeModel {
        identifier: doc.identifier.clone(),
        description: doc.description.clone().or(description),
        minimum_version: max_version(minimum_version, doc.minimum_version.clone()),
        parents,
        input,
        process,
        sources,
    })
}

fn apply_entry(
    process: &mut Vec<Step>,
    identifier: &str,
    entry: &ProcessEntry,
) -> Result<(), ResolveError> {
    match entry {
        ProcessEntry::Step(step) => process.push(step.clone()),
        ProcessEntry::Replace {
            target,
            ordinal,
            with,
        } => {
            let idx = locate_step(process, identifier, "Replace", target, *ordinal)?;
            process[idx] = with.clone();
        }
        ProcessEntry::Delete { target, ordinal } => {
            let idx = locate_step(process, identifier, "Delete", target, *ordinal)?;
            process.remove(idx);
        }
    }
    Ok(())
}

/// Find the step a Replace/Delete refers to.
fn locate_step(
    process: &[Step],
    identifier: &str,
    op: &'static str,
    target: &str,
    ordinal: Option<u32>,
) -> Result<usize, ResolveError> {
    let positions: Vec<usize> = process
        .iter()
        .enumerate()
        .filter(|(_, s)| s.processor == target)
        .map(|(i, _)| i)
        .collect();

    let not_found = || ResolveError::StepTargetNotFound {
        identifier: identifier.to_string(),
        op,
        target: target.to_string(),
        ordinal,
    };

    match ordinal {
        Some(n) => (n as usize)
            .checked_sub(1)
            .and_then(|i| positions.get(i).copied())
            .ok_or_else(not_found),
        None => match positions.as_slice() {
            [] => Err(not_found()),
            [only] => Ok(*only),
            many => Err(ResolveError::AmbiguousStepTarget {
                identifier: identifier.to_string(),
                op,
                target: target.to_string(),
                count: many.len(),
            }),
        },
    }
}

fn max_version(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => {
            let (Some(va), Some(vb)) = (parse_version(&a), parse_version(&b)) else {
                return Some(b);
            };
            if compare_versions(&va, &vb) == Ordering::Less {
                Some(b)
            } else {
                Some(a)
            }
        }
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_document;
    use crate::core::recipe::MemoryLoader;
    use serde_json::json;

    fn doc(yaml: &str) -> RecipeDocument {
        parse_document(yaml).unwrap()
    }

    fn names(model: &RecipeModel) -> Vec<&str> {
        model.process.iter().map(|s| s.processor.as_str()).collect()
    }

    fn base_loader() -> MemoryLoader {
        MemoryLoader::new().with(doc(
            r#"
Identifier: com.example.base
Description: base recipe
Input:
  NAME: Base
  foo: base
Process:
  - Processor: A
    Arguments:
      x: 1
  - Processor: B
"#,
        ))
    }

    #[test]
    fn test_resolve_identity() {
        let loader = base_loader();
        let model = Resolver::new(&loader).resolve("com.example.base").unwrap();
        assert_eq!(model.identifier, "com.example.base");
        assert!(model.parents.is_empty());
        assert_eq!(names(&model), vec!["A", "B"]);
        assert_eq!(model.input["NAME"], json!("Base"));
        assert_eq!(model.process[0].arguments["x"], json!(1));
        assert_eq!(model.description.as_deref(), Some("base recipe"));
    }

    #[test]
    fn test_resolve_deterministic() {
        let loader = base_loader().with(doc(
            "Identifier: child\nParentRecipe: com.example.base\nProcess:\n  - Processor: C\n",
        ));
        let resolver = Resolver::new(&loader);
        let a = resolver.resolve("child").unwrap();
        let b = resolver.resolve("child").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_resolve_append() {
        let loader = base_loader().with(doc(
            "Identifier: child\nParentRecipe: com.example.base\nProcess:\n  - Processor: C\n",
        ));
        let model = Resolver::new(&loader).resolve("child").unwrap();
        assert_eq!(names(&model), vec!["A", "B", "C"]);
        assert_eq!(model.parents, vec!["com.example.base"]);
    }

    #[test]
    fn test_resolve_replace() {
        let loader = base_loader().with(doc(
            r#"
Identifier: child
ParentRecipe: com.example.base
Process:
  - Replace: B
    With:
      Processor: B2
"#,
        ));
        let model = Resolver::new(&loader).resolve("child").unwrap();
        assert_eq!(names(&model), vec!["A", "B2"]);
    }

    #[test]
    fn test_resolve_delete() {
        let loader = base_loader().with(doc(
            "Identifier: child\nParentRecipe: com.example.base\nProcess:\n  - Delete: A\n",
        ));
        let model = Resolver::new(&loader).resolve("child").unwrap();
        assert_eq!(names(&model), vec!["B"]);
    }

    #[test]
    fn test_resolve_ambiguous_target_requires_ordinal() {
        let loader = MemoryLoader::new()
            .with(doc(
                "Identifier: base\nProcess:\n  - Processor: A\n  - Processor: B\n  - Processor: A\n",
            ))
            .with(doc("Identifier: child\nParentRecipe: base\nProcess:\n  - Delete: A\n"))
            .with(doc(
                "Identifier: child2\nParentRecipe: base\nProcess:\n  - Replace: A\n    Ordinal: 2\n    With:\n      Processor: Z\n",
            ));
        let resolver = Resolver::new(&loader);

        let err = resolver.resolve("child").unwrap_err();
        assert!(matches!(err, ResolveError::AmbiguousStepTarget { count: 2, .. }));

        let model = resolver.resolve("child2").unwrap();
        assert_eq!(names(&model), vec!["A", "B", "Z"]);
    }

    #[test]
    fn test_resolve_target_not_found() {
        let loader = base_loader()
            .with(doc(
                "Identifier: child\nParentRecipe: com.example.base\nProcess:\n  - Delete: Q\n",
            ))
            .with(doc(
                "Identifier: child2\nParentRecipe: com.example.base\nProcess:\n  - Delete: A\n    Ordinal: 2\n",
            ));
        let resolver = Resolver::new(&loader);
        assert!(matches!(
            resolver.resolve("child").unwrap_err(),
            ResolveError::StepTargetNotFound { ordinal: None, .. }
        ));
        assert!(matches!(
            resolver.resolve("child2").unwrap_err(),
            ResolveError::StepTargetNotFound { ordinal: Some(2), .. }
        ));
    }

    #[test]
    fn test_resolve_input_child_wins() {
        let loader = base_loader()
            .with(doc(
                "Identifier: mid\nParentRecipe: com.example.base\nInput:\n  foo: mid\n  extra: 1\n",
            ))
            .with(doc("Identifier: top\nParentRecipe: mid\nInput:\n  foo: top\n"));
        let model = Resolver::new(&loader).resolve("top").unwrap();
        assert_eq!(model.input["foo"], json!("top"));
        assert_eq!(model.input["NAME"], json!("Base"));
        assert_eq!(model.input["extra"], json!(1));
        assert_eq!(model.parents, vec!["com.example.base", "mid"]);
        let keys: Vec<_> = model.input.keys().cloned().collect();
        assert_eq!(keys, vec!["NAME", "foo", "extra"]);
    }

    #[test]
    fn test_resolve_layers_later_wins() {
        let loader = base_loader();
        let layers = vec![
            doc("Identifier: o1\nParentRecipe: com.example.base\nInput:\n  foo: first\n"),
            doc("Identifier: o2\nParentRecipe: o1\nInput:\n  foo: second\n"),
        ];
        let model = Resolver::new(&loader)
            .resolve_layered("com.example.base", &layers)
            .unwrap();
        assert_eq!(model.identifier, "o2");
        assert_eq!(model.input["foo"], json!("second"));
        assert_eq!(model.parents, vec!["com.example.base", "o1"]);
    }

    #[test]
    fn test_resolve_layer_parent_mismatch() {
        let loader = base_loader();
        let layers = vec![doc("Identifier: o1\nParentRecipe: something.else\n")];
        let err = Resolver::new(&loader)
            .resolve_layered("com.example.base", &layers)
            .unwrap_err();
        assert!(matches!(err, ResolveError::OverrideParentMismatch { .. }));
    }

    #[test]
    fn test_resolve_cycle() {
        let loader = MemoryLoader::new()
            .with(doc("Identifier: A\nParentRecipe: B\n"))
            .with(doc("Identifier: B\nParentRecipe: A\n"));
        let err = Resolver::new(&loader).resolve("A").unwrap_err();
        match err {
            ResolveError::CyclicRecipeChain { chain } => assert_eq!(chain, vec!["A", "B", "A"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_missing_parent() {
        let loader = MemoryLoader::new().with(doc("Identifier: A\nParentRecipe: ghost\n"));
        let err = Resolver::new(&loader).resolve("A").unwrap_err();
        assert_eq!(
            err,
            ResolveError::RecipeNotFound {
                identifier: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_missing_recipe() {
        let loader = MemoryLoader::new();
        assert!(matches!(
            Resolver::new(&loader).resolve("nope").unwrap_err(),
            ResolveError::RecipeNotFound { .. }
        ));
    }

    #[test]
    fn test_resolve_invalid_document() {
        let loader = MemoryLoader::new().with(doc("Identifier: A\nProcess:\n  - Delete: B\n"));
        assert!(matches!(
            Resolver::new(&loader).resolve("A").unwrap_err(),
            ResolveError::InvalidRecipe { .. }
        ));
    }

    #[test]
    fn test_resolve_minimum_version() {
        let loader = MemoryLoader::new()
            .with(doc("Identifier: old\nMinimumVersion: '0.1'\n"))
            .with(doc("Identifier: future\nMinimumVersion: '999.0'\n"))
            .with(doc("Identifier: child\nParentRecipe: future\nMinimumVersion: '0.5'\n"));
        let resolver = Resolver::new(&loader);
        assert!(resolver.resolve("old").is_ok());
        assert!(matches!(
            resolver.resolve("future").unwrap_err(),
            ResolveError::IncompatibleVersion { .. }
        ));
        // Highest requirement in the chain applies
        assert!(matches!(
            resolver.resolve("child").unwrap_err(),
            ResolveError::IncompatibleVersion { .. }
        ));
    }

    #[test]
    fn test_max_version() {
        assert_eq!(
            max_version(Some("1.2".into()), Some("1.10".into())),
            Some("1.10".to_string())
        );
        assert_eq!(max_version(None, Some("2".into())), Some("2".to_string()));
        assert_eq!(max_version(Some("3".into()), None), Some("3".to_string()));
    }
}
