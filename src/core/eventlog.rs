//! Append-only JSONL run event log, one file per recipe.

use crate::core::types::{RunEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Current UTC time as RFC 3339 with second precision.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default() as u64;
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Derive the event log path for a recipe.
pub fn event_log_path(cache_dir: &Path, recipe: &str) -> PathBuf {
    cache_dir.join(recipe).join("events.jsonl")
}

/// Append an event to the recipe's event log.
pub fn append_event(cache_dir: &Path, recipe: &str, event: RunEvent) -> Result<(), String> {
    let path = event_log_path(cache_dir, recipe);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("cannot create cache dir: {}", e))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;

    Ok(())
}

/// Read back every event in a recipe's log. Malformed lines are skipped.
pub fn read_events(cache_dir: &Path, recipe: &str) -> Result<Vec<TimestampedEvent>, String> {
    let path = event_log_path(cache_dir, recipe);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RunMode;

    #[test]
    fn test_now_iso8601() {
        let ts = now_iso8601();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn test_generate_run_id() {
        let id = generate_run_id();
        assert!(id.starts_with("r-"));
        assert_eq!(id.len(), 2 + 12);
    }

    #[test]
    fn test_event_log_path() {
        let p = event_log_path(Path::new("/cache"), "com.example.Foo");
        assert_eq!(p, PathBuf::from("/cache/com.example.Foo/events.jsonl"));
    }

    #[test]
    fn test_append_and_read_events() {
        let dir = tempfile::tempdir().unwrap();
        append_event(
            dir.path(),
            "r",
            RunEvent::RunStarted {
                recipe: "r".to_string(),
                run_id: "r-abc".to_string(),
                mode: RunMode::Check,
                fingerprint: "blake3:00".to_string(),
                engine_version: "1.0.0".to_string(),
            },
        )
        .unwrap();
        for i in 0..2 {
            append_event(
                dir.path(),
                "r",
                RunEvent::StepStarted {
                    recipe: "r".to_string(),
                    index: i,
                    processor: "P".to_string(),
                },
            )
            .unwrap();
        }

        let content = std::fs::read_to_string(dir.path().join("r/events.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.contains("\"event\":\"run_started\""));
        assert!(content.contains("r-abc"));

        let events = read_events(dir.path(), "r").unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2].event, RunEvent::StepStarted { index: 1, .. }));
    }

    #[test]
    fn test_read_events_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_events(dir.path(), "none").unwrap().is_empty());
    }
}
