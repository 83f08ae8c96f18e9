//! Filesystem processors: create a file, delete paths.

use super::{Flow, InputVariable, OutputVariable, Processor, ProcessorContext, ProcessorError};
use crate::core::types::Value;
use std::path::{Path, PathBuf};

/// Writes `file_content` to `file_path`, optionally setting an octal mode.
#[derive(Debug, Default)]
pub struct FileCreator;

impl Processor for FileCreator {
    fn name(&self) -> &'static str {
        "FileCreator"
    }

    fn description(&self) -> &'static str {
        "Create a file with the given content."
    }

    fn input_variables(&self) -> Vec<InputVariable> {
        vec![
            InputVariable::required("file_path", "Path of the file to write"),
            InputVariable::required("file_content", "Content to write"),
            InputVariable::optional("file_mode", "Octal permission string, e.g. '0644'"),
        ]
    }

    fn output_variables(&self) -> Vec<OutputVariable> {
        Vec::new()
    }

    fn execute(&self, ctx: &mut ProcessorContext<'_>) -> Result<Flow, ProcessorError> {
        let path = PathBuf::from(ctx.require_str("file_path")?);
        let content = ctx
            .get_string("file_content")
            .ok_or_else(|| ProcessorError::MissingInput("file_content".to_string()))?;
        let mode = match ctx.get_string("file_mode") {
            Some(raw) => Some(parse_mode(&raw)?),
            None => None,
        };

        write_atomic(&path, content.as_bytes())?;
        if let Some(mode) = mode {
            set_mode(&path, mode)?;
        }
        ctx.info(format!("created file at {}", path.display()));
        Ok(Flow::Continue)
    }
}

/// Parse an octal permission string such as `"0755"` or `"644"`.
pub fn parse_mode(raw: &str) -> Result<u32, ProcessorError> {
    let digits = raw.trim();
    let digits = digits.strip_prefix("0o").unwrap_or(digits);
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|m| *m <= 0o7777)
        .ok_or_else(|| ProcessorError::InvalidInput {
            key: "file_mode".to_string(),
            reason: format!("'{}' is not an octal mode", raw),
        })
}

/// Suffix appended to the target file name for the in-flight copy.
const TMP_SUFFIX: &str = ".autopkg-tmp";

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

/// Write via a temp file next to `path`, then rename. The temp file is
/// removed if the rename fails.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), ProcessorError> {
    let tmp = temp_path(path);
    std::fs::write(&tmp, content).map_err(|e| ProcessorError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        ProcessorError::io(path, e)
    })
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), ProcessorError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| ProcessorError::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), ProcessorError> {
    Ok(())
}

/// Deletes every path in `path_list`. Directories are removed recursively.
#[derive(Debug, Default)]
pub struct PathDeleter;

impl Processor for PathDeleter {
    fn name(&self) -> &'static str {
        "PathDeleter"
    }

    fn description(&self) -> &'static str {
        "Delete files or directories."
    }

    fn input_variables(&self) -> Vec<InputVariable> {
        vec![InputVariable::required(
            "path_list",
            "A path or list of paths to delete",
        )]
    }

    fn output_variables(&self) -> Vec<OutputVariable> {
        Vec::new()
    }

    fn execute(&self, ctx: &mut ProcessorContext<'_>) -> Result<Flow, ProcessorError> {
        let paths: Vec<PathBuf> = match ctx.get("path_list") {
            Some(Value::String(s)) => vec![PathBuf::from(s)],
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(PathBuf::from)
                        .ok_or_else(|| ProcessorError::InvalidInput {
                            key: "path_list".to_string(),
                            reason: format!("expected a path string, got {}", v),
                        })
                })
                .collect::<Result<_, _>>()?,
            _ => return Err(ProcessorError::MissingInput("path_list".to_string())),
        };

        for path in &paths {
            let meta =
                std::fs::symlink_metadata(path).map_err(|e| ProcessorError::io(path, e))?;
            let removed = if meta.is_dir() {
                std::fs::remove_dir_all(path)
            } else {
                std::fs::remove_file(path)
            };
            removed.map_err(|e| ProcessorError::io(path, e))?;
            ctx.info(format!("deleted {}", path.display()));
        }
        Ok(Flow::Continue)
    }
}
