use super::StatePaths;
use crate::shared::time::now_rfc3339;
use serde::Serialize;
use std::fs;
use std::io::Write;

pub const LEVEL_INFO: &str = "info";
pub const LEVEL_WARN: &str = "warn";
pub const LEVEL_ERROR: &str = "error";
pub const LEVEL_DEBUG: &str = "debug";

/// One line of `logs/runtime.log`. Events are dotted names such as
/// `phase.started` or `workflow.replaced`.
#[derive(Debug, Serialize)]
struct RuntimeLogLine<'a> {
    timestamp: String,
    level: &'a str,
    event: &'a str,
    message: &'a str,
}

/// Best effort: a full disk or missing log folder never fails a workflow.
pub fn append_runtime_log(paths: &StatePaths, level: &str, event: &str, message: &str) {
    let record = RuntimeLogLine {
        timestamp: now_rfc3339(),
        level,
        event,
        message,
    };
    let Ok(line) = serde_json::to_string(&record) else {
        return;
    };

    let path = paths.runtime_log_path();
    if let Some(folder) = path.parent() {
        if !folder.is_dir() && fs::create_dir_all(folder).is_err() {
            return;
        }
    }
    if let Ok(mut log) = fs::OpenOptions::new().create(true).append(true).open(&path) {
        let _ = writeln!(log, "{line}");
    }
}
