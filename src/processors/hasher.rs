//! BLAKE3 content hashing for files and directories, and the FileHasher
//! processor built on it.

use super::{Flow, InputVariable, OutputVariable, Processor, ProcessorContext, ProcessorError};
use crate::core::types::Value;
use std::io::Read;
use std::path::{Path, PathBuf};

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a file's contents. Returns `"blake3:{hex}"`.
pub fn hash_file(path: &Path) -> Result<String, ProcessorError> {
    let mut file = std::fs::File::open(path).map_err(|e| ProcessorError::io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| ProcessorError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash a directory tree: sorted walk, relative paths mixed in, symlinks
/// skipped.
pub fn hash_directory(path: &Path) -> Result<String, ProcessorError> {
    fn walk(base: &Path, current: &Path, entries: &mut Vec<(String, String)>) -> Result<(), ProcessorError> {
        let read_dir = std::fs::read_dir(current).map_err(|e| ProcessorError::io(current, e))?;
        let mut children: Vec<std::fs::DirEntry> = read_dir.filter_map(|e| e.ok()).collect();
        children.sort_by_key(|e| e.file_name());

        for entry in children {
            let child = entry.path();
            let ft = entry.file_type().map_err(|e| ProcessorError::io(&child, e))?;
            if ft.is_symlink() {
                continue;
            }
            let rel = child
                .strip_prefix(base)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            if ft.is_file() {
                entries.push((rel, hash_file(&child)?));
            } else if ft.is_dir() {
                walk(base, &child, entries)?;
            }
        }
        Ok(())
    }

    let mut entries = Vec::new();
    walk(path, path, &mut entries)?;

    let mut hasher = blake3::Hasher::new();
    for (rel, hash) in &entries {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hashes the file or directory at `path` into `file_hash`.
#[derive(Debug, Default)]
pub struct FileHasher;

impl Processor for FileHasher {
    fn name(&self) -> &'static str {
        "FileHasher"
    }

    fn description(&self) -> &'static str {
        "Compute a BLAKE3 digest of a file or directory."
    }

    fn input_variables(&self) -> Vec<InputVariable> {
        vec![InputVariable::required("path", "File or directory to hash")]
    }

    fn output_variables(&self) -> Vec<OutputVariable> {
        vec![OutputVariable::new("file_hash", "'blake3:<hex>' digest")]
    }

    fn execute(&self, ctx: &mut ProcessorContext<'_>) -> Result<Flow, ProcessorError> {
        let path = PathBuf::from(ctx.require_str("path")?);
        let digest = if path.is_dir() {
            hash_directory(&path)?
        } else {
            hash_file(&path)?
        };
        ctx.info(format!("{} {}", digest, path.display()));
        ctx.set("file_hash", Value::String(digest));
        Ok(Flow::Continue)
    }
}
