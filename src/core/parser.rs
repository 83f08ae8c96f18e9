//! Recipe document parsing and structural validation.
//!
//! Documents are YAML (`*.recipe.yaml`, `*.recipe.yml`) or JSON
//! (`*.recipe.json`). Validation checks constraints serde cannot express:
//! - Identifier must not be empty
//! - Every step names a processor
//! - Ordinals are 1-based
//! - Replace/Delete only appear in documents with a parent
//! - MinimumVersion is a dotted numeric version

use super::types::{ProcessEntry, RecipeDocument};
use std::cmp::Ordering;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Recognised recipe file suffixes.
pub const RECIPE_SUFFIXES: &[&str] = &[".recipe.yaml", ".recipe.yml", ".recipe.json"];

/// Strip a recipe suffix from a file name, if it carries one.
pub fn recipe_name_from_file(file_name: &str) -> Option<&str> {
    RECIPE_SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
        .filter(|name| !name.is_empty())
}

/// Parse a recipe document from disk, choosing the format by extension.
pub fn parse_document_file(path: &Path) -> Result<RecipeDocument, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        parse_document_json(&content)
            .map_err(|e| format!("{}: {}", path.display(), e))
    } else {
        parse_document(&content).map_err(|e| format!("{}: {}", path.display(), e))
    }
}

/// Parse a YAML recipe document.
pub fn parse_document(yaml: &str) -> Result<RecipeDocument, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Parse a JSON recipe document.
pub fn parse_document_json(json: &str) -> Result<RecipeDocument, String> {
    serde_json::from_str(json).map_err(|e| format!("JSON parse error: {}", e))
}

/// Validate a parsed document. Returns a list of errors (empty = valid).
pub fn validate_document(doc: &RecipeDocument) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if doc.identifier.trim().is_empty() {
        errors.push(ValidationError {
            message: "Identifier must not be empty".to_string(),
        });
    }

    if let Some(ref parent) = doc.parent_recipe {
        if parent == &doc.identifier {
            errors.push(ValidationError {
                message: format!("recipe '{}' names itself as ParentRecipe", doc.identifier),
            });
        }
    }

    if let Some(ref version) = doc.minimum_version {
        if parse_version(version).is_none() {
            errors.push(ValidationError {
                message: format!(
                    "recipe '{}' has malformed MinimumVersion '{}'",
                    doc.identifier, version
                ),
            });
        }
    }

    for (i, entry) in doc.process.iter().enumerate() {
        match entry {
            ProcessEntry::Step(step) => {
                if step.processor.trim().is_empty() {
                    errors.push(ValidationError {
                        message: format!("process entry {} has an empty Processor", i),
                    });
                }
            }
            ProcessEntry::Replace {
                target,
                ordinal,
                with,
            } => {
                check_target(&mut errors, doc, i, "Replace", target, *ordinal);
                if with.processor.trim().is_empty() {
                    errors.push(ValidationError {
                        message: format!("process entry {} replaces with an empty Processor", i),
                    });
                }
            }
            ProcessEntry::Delete { target, ordinal } => {
                check_target(&mut errors, doc, i, "Delete", target, *ordinal);
            }
        }
    }

    errors
}

fn check_target(
    errors: &mut Vec<ValidationError>,
    doc: &RecipeDocument,
    index: usize,
    op: &str,
    target: &str,
    ordinal: Option<u32>,
) {
    if doc.parent_recipe.is_none() {
        errors.push(ValidationError {
            message: format!(
                "process entry {} uses {} but recipe '{}' has no ParentRecipe",
                index, op, doc.identifier
            ),
        });
    }
    if target.trim().is_empty() {
        errors.push(ValidationError {
            message: format!("process entry {} has an empty {} target", index, op),
        });
    }
    if ordinal == Some(0) {
        errors.push(ValidationError {
            message: format!("process entry {}: Ordinal starts at 1", index),
        });
    }
}

/// Parse a dotted numeric version ("1", "2.3", "1.0.4").
pub fn parse_version(version: &str) -> Option<Vec<u64>> {
    let trimmed = version.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.split('.').map(|p| p.parse::<u64>().ok()).collect()
}

/// Compare two dotted versions; missing components count as zero.
pub fn compare_versions(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
