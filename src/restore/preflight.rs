// pgdata-restorer/src/restore/preflight.rs
use std::path::{Path, PathBuf};

use crate::errors::{RestoreError, Result};
use crate::utils::process::{CommandRunner, run_checked};

/// Verifies that the WAL dump utility resolves on the search path.
pub fn check_wal_tool(runner: &dyn CommandRunner, tool: &str) -> Result<PathBuf> {
    match runner.find_executable(tool) {
        Some(path) => {
            log::info!("[Restore] Found {} at {}", tool, path.display());
            Ok(path)
        }
        None => Err(RestoreError::ToolNotFound {
            tool: tool.to_string(),
        }),
    }
}

/// Checks free space on the filesystem holding `checked_path` with `df -P`.
pub fn check_free_space(runner: &dyn CommandRunner, checked_path: &Path) -> Result<()> {
    let target = checked_path.to_string_lossy().into_owned();
    let output = run_checked(runner, "df", &["-P", target.as_str()])
        .map_err(|e| RestoreError::CheckFailed(e.to_string()))?;

    let free = parse_free_space(&output.stdout)?;
    if free == "0" {
        return Err(RestoreError::InsufficientSpace {
            path: checked_path.to_path_buf(),
            free: free.to_string(),
        });
    }

    log::info!(
        "[Restore] Free space on partition holding {}: {}",
        checked_path.display(),
        free
    );
    Ok(())
}

/// Extracts the fourth field of the second line of a `df` report.
fn parse_free_space(report: &str) -> Result<&str> {
    let lines: Vec<&str> = report.lines().collect();
    if lines.len() < 2 {
        return Err(RestoreError::CheckFailed(format!(
            "unexpected output from df command: expected at least 2 lines, got {}",
            lines.len()
        )));
    }

    let fields: Vec<&str> = lines[1].split_whitespace().collect();
    if fields.len() < 4 {
        return Err(RestoreError::CheckFailed(format!(
            "unexpected output from df command: expected at least 4 fields, got {} in {:?}",
            fields.len(),
            lines[1]
        )));
    }
    Ok(fields[3])
}
