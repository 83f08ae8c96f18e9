//! Preferences: where recipes live, where caches go, and global variables.
//!
//! Loaded from TOML. Every key is optional; unknown keys are rejected so a
//! typo never silently falls back to a default.

use super::types::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_PREFS_FILE: &str = "autopkg.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Preferences {
    #[serde(default = "default_search_dirs")]
    pub recipe_search_dirs: Vec<PathBuf>,

    #[serde(default = "default_override_dirs")]
    pub recipe_override_dirs: Vec<PathBuf>,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Append run events to `<cache_dir>/<identifier>/events.jsonl`
    #[serde(default = "default_true")]
    pub event_log: bool,

    /// Lowest-precedence variables seeded into every run
    #[serde(default)]
    pub variables: IndexMap<String, Value>,
}

fn default_search_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_override_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("./overrides")]
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_true() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            recipe_search_dirs: default_search_dirs(),
            recipe_override_dirs: default_override_dirs(),
            cache_dir: default_cache_dir(),
            event_log: true,
            variables: IndexMap::new(),
        }
    }
}

/// Parse preferences from TOML text.
pub fn parse_preferences(text: &str) -> Result<Preferences, String> {
    toml::from_str(text).map_err(|e| format!("preferences parse error: {}", e))
}

/// Load preferences from `path`, else `autopkg.toml` in the working
/// directory, else defaults. An explicit path that does not exist is an error.
pub fn load_preferences(path: Option<&Path>) -> Result<Preferences, String> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let fallback = PathBuf::from(DEFAULT_PREFS_FILE);
            if !fallback.is_file() {
                debug!("no {} found, using default preferences", DEFAULT_PREFS_FILE);
                return Ok(Preferences::default());
            }
            fallback
        }
    };
    let text = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let prefs = parse_preferences(&text).map_err(|e| format!("{}: {}", path.display(), e))?;
    debug!(path = %path.display(), "loaded preferences");
    Ok(prefs)
}
