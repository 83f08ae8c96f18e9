//! Recipe discovery and loading.
//!
//! A [`RecipeLoader`] turns an identifier into a document. Two loaders ship
//! with the crate: [`MemoryLoader`] for embedding and tests, and
//! [`DirectoryLoader`], which walks override directories first and recipe
//! search directories second, each in sorted order, so lookups never depend on
//! filesystem iteration order.

use super::parser;
use super::resolver::ResolveError;
use super::types::{LoadedRecipe, RecipeDocument};
use indexmap::IndexMap;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Source of recipe documents.
pub trait RecipeLoader {
    /// Load a document by identifier. `Ok(None)` means not found.
    fn load(&self, identifier: &str) -> Result<Option<LoadedRecipe>, ResolveError>;
}

/// In-memory documents keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    documents: IndexMap<String, RecipeDocument>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a document.
    pub fn insert(&mut self, doc: RecipeDocument) {
        self.documents.insert(doc.identifier.clone(), doc);
    }

    /// Builder-style insert.
    pub fn with(mut self, doc: RecipeDocument) -> Self {
        self.insert(doc);
        self
    }
}

impl RecipeLoader for MemoryLoader {
    fn load(&self, identifier: &str) -> Result<Option<LoadedRecipe>, ResolveError> {
        Ok(self.documents.get(identifier).map(|doc| LoadedRecipe {
            document: doc.clone(),
            path: None,
        }))
    }
}

/// One discoverable recipe file.
#[derive(Debug, Clone)]
pub struct RecipeListing {
    pub identifier: String,
    /// File name without the `.recipe.*` suffix
    pub name: String,
    pub path: PathBuf,
    pub is_override: bool,
    pub document: RecipeDocument,
}

/// Loads recipes from override and search directories.
#[derive(Debug)]
pub struct DirectoryLoader {
    override_dirs: Vec<PathBuf>,
    search_dirs: Vec<PathBuf>,
    excluded: Vec<PathBuf>,
    index: OnceLock<Vec<RecipeListing>>,
}

impl DirectoryLoader {
    pub fn new(search_dirs: Vec<PathBuf>, override_dirs: Vec<PathBuf>) -> Self {
        Self {
            override_dirs,
            search_dirs,
            excluded: Vec::new(),
            index: OnceLock::new(),
        }
    }

    /// Never list recipes found under these directories (e.g. the cache)
    /// while walking search directories.
    pub fn with_excluded(mut self, dirs: Vec<PathBuf>) -> Self {
        self.excluded = dirs;
        self
    }

    /// Every discoverable recipe in lookup order: overrides first, then
    /// search directories, each directory in sorted path order.
    pub fn list(&self) -> &[RecipeListing] {
        self.index.get_or_init(|| {
            let mut listings = Vec::new();
            for dir in &self.override_dirs {
                scan_dir(dir, true, &[], &mut listings);
            }
            // Override dirs nested in a search dir are listed once, as overrides.
            let skip: Vec<PathBuf> = self
                .override_dirs
                .iter()
                .chain(&self.excluded)
                .map(|d| normalized(d))
                .collect();
            for dir in &self.search_dirs {
                scan_dir(dir, false, &skip, &mut listings);
            }
            report_duplicates(&listings);
            listings
        })
    }

    fn load_path(&self, path: &Path) -> Result<LoadedRecipe, ResolveError> {
        let document =
            parser::parse_document_file(path).map_err(|message| ResolveError::InvalidRecipe {
                identifier: path.display().to_string(),
                message,
            })?;
        Ok(LoadedRecipe {
            document,
            path: Some(path.to_path_buf()),
        })
    }
}

impl RecipeLoader for DirectoryLoader {
    fn load(&self, identifier: &str) -> Result<Option<LoadedRecipe>, ResolveError> {
        let direct = Path::new(identifier);
        if direct.is_file() {
            if let Some(file_name) = direct.file_name().and_then(|n| n.to_str()) {
                if parser::recipe_name_from_file(file_name).is_some() {
                    return self.load_path(direct).map(Some);
                }
            }
        }

        let listings = self.list();
        let found = listings
            .iter()
            .find(|l| l.identifier == identifier)
            .or_else(|| listings.iter().find(|l| l.name == identifier));

        Ok(found.map(|l| {
            debug!(identifier, path = %l.path.display(), "located recipe");
            LoadedRecipe {
                document: l.document.clone(),
                path: Some(l.path.clone()),
            }
        }))
    }
}

/// Collect recipe files under `dir`, sorted by path.
fn recipe_files(dir: &Path) -> Vec<PathBuf> {
    let base = glob::Pattern::escape(&dir.to_string_lossy());
    let pattern = format!("{}/**/*.recipe.*", base);
    let mut files: Vec<PathBuf> = match glob::glob(&pattern) {
        Ok(paths) => paths
            .filter_map(|p| p.ok())
            .filter(|p| p.is_file())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(parser::recipe_name_from_file)
                    .is_some()
            })
            .collect(),
        Err(e) => {
            warn!(dir = %dir.display(), "cannot scan recipe directory: {}", e);
            Vec::new()
        }
    };
    files.sort();
    files
}

/// `path` without `.` components, so `./overrides/x` starts with `overrides`.
fn normalized(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn scan_dir(dir: &Path, is_override: bool, skip: &[PathBuf], listings: &mut Vec<RecipeListing>) {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "recipe directory does not exist, skipping");
        return;
    }
    for path in recipe_files(dir) {
        let norm = normalized(&path);
        if skip.iter().any(|s| norm.starts_with(s)) {
            continue;
        }
        let name = match path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parser::recipe_name_from_file)
        {
            Some(n) => n.to_string(),
            None => continue,
        };
        match parser::parse_document_file(&path) {
            Ok(document) => listings.push(RecipeListing {
                identifier: document.identifier.clone(),
                name,
                path,
                is_override,
                document,
            }),
            Err(e) => warn!("skipping unreadable recipe: {}", e),
        }
    }
}

fn report_duplicates(listings: &[RecipeListing]) {
    let mut seen: IndexMap<&str, &Path> = IndexMap::new();
    for l in listings {
        if let Some(first) = seen.get(l.identifier.as_str()) {
            warn!(
                identifier = %l.identifier,
                used = %first.display(),
                ignored = %l.path.display(),
                "duplicate recipe identifier"
            );
        } else {
            seen.insert(&l.identifier, &l.path);
        }
    }
}
