use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Position of a step inside the restore sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStep {
    ToolCheck,
    FreeSpaceCheck,
    StopService,
    Migrate,
    StartService,
}

impl RestoreStep {
    pub const COUNT: usize = 5;

    /// 1-based index, as shown to the operator.
    pub fn index(self) -> usize {
        match self {
            RestoreStep::ToolCheck => 1,
            RestoreStep::FreeSpaceCheck => 2,
            RestoreStep::StopService => 3,
            RestoreStep::Migrate => 4,
            RestoreStep::StartService => 5,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            RestoreStep::ToolCheck => "WAL tool availability check",
            RestoreStep::FreeSpaceCheck => "free space check",
            RestoreStep::StopService => "stop database service",
            RestoreStep::Migrate => "data directory migration",
            RestoreStep::StartService => "start database service",
        }
    }
}

impl fmt::Display for RestoreStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}/{} ({})", self.index(), Self::COUNT, self.describe())
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to execute `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` exited with {}: {stderr}", exit_code_label(.code))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("backup directory {} does not exist or is not a directory", .0.display())]
    MissingBackupDir(PathBuf),

    #[error("backup directory {} lies inside the data directory {}", .backup.display(), .pgdata.display())]
    BackupInsideDataDir { backup: PathBuf, pgdata: PathBuf },

    #[error("backup directory {} contains the data directory {}", .backup.display(), .pgdata.display())]
    BackupContainsDataDir { backup: PathBuf, pgdata: PathBuf },

    #[error("backup directory {} contains no files", .0.display())]
    EmptyBackupDir(PathBuf),

    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to walk {}: {source}", .root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

impl MigrationError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        MigrationError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("{tool} utility not found in PATH. Is PostgreSQL installed correctly?")]
    ToolNotFound { tool: String },

    #[error("free space check failed: {0}")]
    CheckFailed(String),

    #[error("not enough free space on the partition holding {} (available: {free})", .path.display())]
    InsufficientSpace { path: PathBuf, free: String },

    #[error("failed to stop the database service: {0}")]
    ServiceStopFailed(#[source] CommandError),

    #[error("data directory migration failed: {0}")]
    MigrationFailed(#[source] MigrationError),

    #[error("failed to start the database service: {0}")]
    ServiceStartFailed(#[source] CommandError),

    #[error("invalid restore request: {0}")]
    InvalidRequest(String),

    #[error("a restore is already in progress")]
    AlreadyRunning,

    #[error("restore worker exited without reporting an outcome")]
    WorkerLost,
}

impl RestoreError {
    /// The sequence step that produced this error, if it came from one.
    pub fn step(&self) -> Option<RestoreStep> {
        match self {
            RestoreError::ToolNotFound { .. } => Some(RestoreStep::ToolCheck),
            RestoreError::CheckFailed(_) | RestoreError::InsufficientSpace { .. } => {
                Some(RestoreStep::FreeSpaceCheck)
            }
            RestoreError::ServiceStopFailed(_) => Some(RestoreStep::StopService),
            RestoreError::MigrationFailed(_) => Some(RestoreStep::Migrate),
            RestoreError::ServiceStartFailed(_) => Some(RestoreStep::StartService),
            RestoreError::InvalidRequest(_)
            | RestoreError::AlreadyRunning
            | RestoreError::WorkerLost => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RestoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_display_includes_position() {
        assert_eq!(
            RestoreStep::Migrate.to_string(),
            "step 4/5 (data directory migration)"
        );
    }

    #[test]
    fn test_errors_map_to_their_step() {
        let stop = RestoreError::ServiceStopFailed(CommandError::Failed {
            program: "service".into(),
            code: Some(1),
            stderr: String::new(),
        });
        assert_eq!(stop.step(), Some(RestoreStep::StopService));
        assert_eq!(
            RestoreError::CheckFailed("bad".into()).step(),
            Some(RestoreStep::FreeSpaceCheck)
        );
        assert_eq!(RestoreError::AlreadyRunning.step(), None);
    }

    #[test]
    fn test_command_failure_message_without_code() {
        let err = CommandError::Failed {
            program: "service".into(),
            code: None,
            stderr: "killed".into(),
        };
        assert_eq!(
            err.to_string(),
            "`service` exited with no status (terminated by signal): killed"
        );
    }
}
