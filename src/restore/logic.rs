// pgdata-restorer/src/restore/logic.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::RestoreConfig;
use crate::errors::{RestoreError, RestoreStep, Result};
use crate::restore::migrate::{self, MigrationOptions};
use crate::restore::{preflight, service};
use crate::utils::process::CommandRunner;

/// A single operator request to restore from `backup_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    backup_dir: PathBuf,
}

impl RestoreRequest {
    pub fn new(backup_dir: &str) -> Result<Self> {
        if backup_dir.trim().is_empty() {
            return Err(RestoreError::InvalidRequest(
                "backup directory path cannot be empty".to_string(),
            ));
        }
        Ok(RestoreRequest {
            backup_dir: PathBuf::from(backup_dir),
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }
}

#[derive(Debug)]
pub enum RestoreOutcome {
    Success,
    Failure(RestoreError),
}

impl RestoreOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RestoreOutcome::Success)
    }

    pub fn error(&self) -> Option<&RestoreError> {
        match self {
            RestoreOutcome::Success => None,
            RestoreOutcome::Failure(e) => Some(e),
        }
    }
}

impl From<Result<()>> for RestoreOutcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => RestoreOutcome::Success,
            Err(e) => RestoreOutcome::Failure(e),
        }
    }
}

/// Held while a restore runs; clears the in-flight flag when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Runs the restore sequence against one data directory.
pub struct RestoreOrchestrator {
    config: RestoreConfig,
    runner: Arc<dyn CommandRunner>,
    in_flight: Arc<AtomicBool>,
}

impl RestoreOrchestrator {
    pub fn new(config: RestoreConfig, runner: Arc<dyn CommandRunner>) -> Self {
        RestoreOrchestrator {
            config,
            runner,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claims the orchestrator for one restore, or fails if another is in flight.
    pub fn try_acquire(&self) -> Result<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RestoreError::AlreadyRunning)?;
        Ok(InFlightGuard {
            flag: Arc::clone(&self.in_flight),
        })
    }

    /// Runs the full sequence synchronously.
    pub fn restore(&self, request: &RestoreRequest) -> RestoreOutcome {
        match self.try_acquire() {
            Ok(guard) => self.restore_with_guard(request, guard),
            Err(e) => {
                log::warn!("[Restore] Rejected request for {}: {}", request.backup_dir().display(), e);
                RestoreOutcome::Failure(e)
            }
        }
    }

    /// Runs the sequence under a guard obtained from `try_acquire`.
    pub fn restore_with_guard(&self, request: &RestoreRequest, guard: InFlightGuard) -> RestoreOutcome {
        log::info!(
            "[Restore] Restoring {} from backup {} (WAL backup: {})",
            self.config.pgdata_dir.display(),
            request.backup_dir().display(),
            self.config.wal_backup_dir.display()
        );

        let outcome = RestoreOutcome::from(self.run_steps(request));
        drop(guard);

        if outcome.is_success() {
            log::info!("[Restore] Backup restored successfully.");
        }
        if let Some(e) = outcome.error() {
            match e.step() {
                Some(step) => log::error!("[Restore] Restore aborted at {}: {}", step, e),
                None => log::error!("[Restore] Restore aborted: {}", e),
            }
        }
        outcome
    }

    fn run_steps(&self, request: &RestoreRequest) -> Result<()> {
        let runner = self.runner.as_ref();

        begin(RestoreStep::ToolCheck);
        preflight::check_wal_tool(runner, &self.config.wal_tool)?;

        begin(RestoreStep::FreeSpaceCheck);
        preflight::check_free_space(runner, &self.config.free_space_check_path)?;

        begin(RestoreStep::StopService);
        service::stop_service(runner, &self.config.service)
            .map_err(RestoreError::ServiceStopFailed)?;

        begin(RestoreStep::Migrate);
        let summary = migrate::migrate(
            request.backup_dir(),
            &self.config.pgdata_dir,
            &self.config.wal_backup_dir,
            MigrationOptions {
                copy_across_devices: self.config.copy_across_devices,
            },
        )
        .map_err(RestoreError::MigrationFailed)?;
        log::info!(
            "[Restore] Migration moved {} data entries and {} WAL entries",
            summary.data_entries,
            summary.wal_entries
        );

        begin(RestoreStep::StartService);
        service::start_service(runner, &self.config.service)
            .map_err(RestoreError::ServiceStartFailed)?;

        Ok(())
    }
}

fn begin(step: RestoreStep) {
    log::info!("[Restore] Starting {}", step);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CommandError, MigrationError};
    use crate::utils::process::fake::FakeCommandRunner;
    use std::fs;
    use tempfile::TempDir;

    const DF_OK: &str = "Filesystem Size Used Avail Use% Mounted on\n/dev/sda1 100G 50G 40G 60% /usr\n";
    const DF_FULL: &str = "Filesystem Size Used Avail Use% Mounted on\n/dev/sda1 100G 100G 0 100% /usr\n";

    struct Host {
        tmp: TempDir,
        config: RestoreConfig,
        backup: PathBuf,
    }

    impl Host {
        fn new() -> anyhow::Result<Self> {
            let tmp = TempDir::new()?;
            let config = RestoreConfig::with_pgdata_dir(tmp.path().join("pg1/pgdata"));
            let backup = tmp.path().join("mnt/backup/full");

            fs::create_dir_all(backup.join("global"))?;
            fs::write(backup.join("global/pg_control"), "new")?;
            fs::create_dir_all(&config.wal_backup_dir)?;
            fs::write(config.wal_backup_dir.join("000000010000000000000007"), "wal")?;
            fs::write(config.pgdata_dir.join("PG_VERSION"), "old")?;

            Ok(Host { tmp, config, backup })
        }

        fn df_line(&self) -> String {
            format!("df -P {}", self.config.free_space_check_path.display())
        }

        fn healthy_runner(&self) -> FakeCommandRunner {
            FakeCommandRunner::new()
                .with_executable("pg_waldump")
                .respond(&self.df_line(), 0, DF_OK)
                .respond("service postgresql stop", 0, "")
                .respond("service postgresql start", 0, "")
        }

        fn request(&self) -> anyhow::Result<RestoreRequest> {
            Ok(RestoreRequest::new(&self.backup.to_string_lossy())?)
        }

        fn data_untouched(&self) -> bool {
            fs::read_to_string(self.config.pgdata_dir.join("PG_VERSION")).ok().as_deref() == Some("old")
        }
    }

    fn orchestrator(host: &Host, runner: Arc<FakeCommandRunner>) -> RestoreOrchestrator {
        RestoreOrchestrator::new(host.config.clone(), runner)
    }

    #[test]
    fn test_successful_restore_runs_steps_in_order() -> anyhow::Result<()> {
        let host = Host::new()?;
        let runner = Arc::new(host.healthy_runner());

        let outcome = orchestrator(&host, runner.clone()).restore(&host.request()?);

        assert!(outcome.is_success(), "unexpected outcome: {:?}", outcome);
        assert_eq!(
            runner.calls(),
            vec![
                "which pg_waldump".to_string(),
                host.df_line(),
                "service postgresql stop".to_string(),
                "service postgresql start".to_string(),
            ]
        );
        let pgdata = &host.config.pgdata_dir;
        assert_eq!(fs::read_to_string(pgdata.join("global/pg_control"))?, "new");
        assert_eq!(fs::read_to_string(pgdata.join("pg_wal/000000010000000000000007"))?, "wal");
        assert!(!pgdata.join("PG_VERSION").exists());
        Ok(())
    }

    #[test]
    fn test_free_space_check_targets_data_dir_parent() -> anyhow::Result<()> {
        let host = Host::new()?;
        assert_eq!(host.config.free_space_check_path, host.tmp.path().join("pg1"));
        assert_ne!(host.config.free_space_check_path, PathBuf::from("/usr"));
        Ok(())
    }

    #[test]
    fn test_missing_tool_aborts_before_any_mutation() -> anyhow::Result<()> {
        let host = Host::new()?;
        let runner = Arc::new(
            FakeCommandRunner::new()
                .respond(&host.df_line(), 0, DF_OK)
                .respond("service postgresql stop", 0, ""),
        );

        let outcome = orchestrator(&host, runner.clone()).restore(&host.request()?);

        assert!(matches!(outcome.error(), Some(RestoreError::ToolNotFound { .. })));
        assert_eq!(runner.calls(), vec!["which pg_waldump"]);
        assert!(host.data_untouched());
        assert!(host.backup.join("global/pg_control").is_file());
        Ok(())
    }

    #[test]
    fn test_zero_free_space_aborts_before_stop() -> anyhow::Result<()> {
        let host = Host::new()?;
        let runner = Arc::new(
            FakeCommandRunner::new()
                .with_executable("pg_waldump")
                .respond(&host.df_line(), 0, DF_FULL)
                .respond("service postgresql stop", 0, ""),
        );

        let outcome = orchestrator(&host, runner.clone()).restore(&host.request()?);

        let err = outcome.error().expect("restore should fail");
        assert!(matches!(err, RestoreError::InsufficientSpace { .. }));
        assert_eq!(err.step(), Some(RestoreStep::FreeSpaceCheck));
        assert!(!runner.calls().iter().any(|c| c.starts_with("service")));
        assert!(host.data_untouched());
        Ok(())
    }

    #[test]
    fn test_single_line_df_output_is_check_failed() -> anyhow::Result<()> {
        let host = Host::new()?;
        let runner = Arc::new(
            FakeCommandRunner::new()
                .with_executable("pg_waldump")
                .respond(&host.df_line(), 0, "Filesystem Size Used Avail Use% Mounted on\n"),
        );

        let outcome = orchestrator(&host, runner.clone()).restore(&host.request()?);

        assert!(matches!(outcome.error(), Some(RestoreError::CheckFailed(_))));
        assert!(host.data_untouched());
        assert!(host.config.wal_backup_dir.join("000000010000000000000007").is_file());
        Ok(())
    }

    #[test]
    fn test_stop_failure_skips_migration() -> anyhow::Result<()> {
        let host = Host::new()?;
        let runner = Arc::new(
            FakeCommandRunner::new()
                .with_executable("pg_waldump")
                .respond(&host.df_line(), 0, DF_OK)
                .respond("service postgresql stop", 1, "")
                .respond("service postgresql start", 0, ""),
        );

        let outcome = orchestrator(&host, runner.clone()).restore(&host.request()?);

        match outcome.error() {
            Some(RestoreError::ServiceStopFailed(CommandError::Failed { code, .. })) => {
                assert_eq!(*code, Some(1));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!runner.calls().contains(&"service postgresql start".to_string()));
        assert!(host.data_untouched());
        Ok(())
    }

    #[test]
    fn test_start_failure_is_reported_after_migration() -> anyhow::Result<()> {
        let host = Host::new()?;
        let runner = Arc::new(
            FakeCommandRunner::new()
                .with_executable("pg_waldump")
                .respond(&host.df_line(), 0, DF_OK)
                .respond("service postgresql stop", 0, "")
                .respond("service postgresql start", 1, ""),
        );

        let outcome = orchestrator(&host, runner).restore(&host.request()?);

        let err = outcome.error().expect("restore should fail");
        assert!(matches!(err, RestoreError::ServiceStartFailed(_)));
        assert_eq!(err.step(), Some(RestoreStep::StartService));
        assert!(host.config.pgdata_dir.join("global/pg_control").is_file());
        Ok(())
    }

    #[test]
    fn test_second_restore_from_same_backup_fails_at_migration() -> anyhow::Result<()> {
        let host = Host::new()?;
        let runner = Arc::new(host.healthy_runner());
        let orchestrator = orchestrator(&host, runner.clone());

        assert!(orchestrator.restore(&host.request()?).is_success());
        let second = orchestrator.restore(&host.request()?);

        match second.error() {
            Some(RestoreError::MigrationFailed(MigrationError::MissingBackupDir(_))) => {}
            other => panic!("expected migration failure, got {:?}", other),
        }
        // Stopped for the second attempt, never restarted.
        let calls = runner.calls();
        assert_eq!(calls.last().map(String::as_str), Some("service postgresql stop"));
        assert!(orchestrator.try_acquire().is_ok());
        Ok(())
    }

    #[test]
    fn test_concurrent_restore_is_rejected() -> anyhow::Result<()> {
        let host = Host::new()?;
        let orchestrator = orchestrator(&host, Arc::new(host.healthy_runner()));

        let guard = orchestrator.try_acquire()?;
        let outcome = orchestrator.restore(&host.request()?);
        assert!(matches!(outcome.error(), Some(RestoreError::AlreadyRunning)));
        assert!(host.data_untouched());

        drop(guard);
        assert!(orchestrator.restore(&host.request()?).is_success());
        Ok(())
    }

    #[test]
    fn test_empty_request_is_invalid() {
        assert!(matches!(
            RestoreRequest::new("   "),
            Err(RestoreError::InvalidRequest(_))
        ));
        assert!(matches!(RestoreRequest::new(""), Err(RestoreError::InvalidRequest(_))));
    }

    #[test]
    fn test_request_keeps_path_verbatim() {
        assert_eq!(
            RestoreRequest::new("/mnt/backup/nightly ").map(|r| r.backup_dir().to_path_buf()).ok(),
            Some(PathBuf::from("/mnt/backup/nightly "))
        );
    }
}
