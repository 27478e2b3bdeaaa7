// pgdata-restorer/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_PGDATA_DIR: &str = "/srv/pg1/pgdata";
pub const DEFAULT_WAL_BACKUP_SUBDIR: &str = "pg_wal_backup";
pub const DEFAULT_WAL_TOOL: &str = "pg_waldump";
pub const DEFAULT_SERVICE_NAME: &str = "postgresql";
pub const DEFAULT_LOG_FILE: &str = "logs/backup-restorer.log";

/// Service manager used to stop and start the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceManager {
    /// `service <name> <action>`
    #[default]
    Service,
    /// `systemctl <action> <name>`
    Systemctl,
}

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawJsonConfig {
    pub pgdata_dir: Option<PathBuf>,
    pub wal_backup_dir: Option<PathBuf>,
    pub wal_tool: Option<String>,
    pub service_manager: Option<ServiceManager>,
    pub service_name: Option<String>,
    pub free_space_check_path: Option<PathBuf>,
    pub copy_across_devices: Option<bool>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub manager: ServiceManager,
    pub name: String,
}

/// Everything the restore sequence needs to know about the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreConfig {
    pub pgdata_dir: PathBuf,
    pub wal_backup_dir: PathBuf,
    pub wal_tool: String,
    pub service: ServiceConfig,
    pub free_space_check_path: PathBuf,
    pub copy_across_devices: bool,
}

impl RestoreConfig {
    /// Builds a configuration rooted at `pgdata_dir` with every other setting at its default.
    pub fn with_pgdata_dir(pgdata_dir: impl Into<PathBuf>) -> Self {
        let pgdata_dir = pgdata_dir.into();
        RestoreConfig {
            wal_backup_dir: pgdata_dir.join(DEFAULT_WAL_BACKUP_SUBDIR),
            wal_tool: DEFAULT_WAL_TOOL.to_string(),
            service: ServiceConfig {
                manager: ServiceManager::default(),
                name: DEFAULT_SERVICE_NAME.to_string(),
            },
            free_space_check_path: check_path_for(&pgdata_dir),
            copy_across_devices: true,
            pgdata_dir,
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        RestoreConfig::with_pgdata_dir(DEFAULT_PGDATA_DIR)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub restore: RestoreConfig,
    pub log_file: PathBuf,
}

impl AppConfig {
    /// Loads `config_path`, falling back to defaults when the file does not exist.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return AppConfig::from_raw(RawJsonConfig::default());
        }
        AppConfig::load_from_json(config_path)
    }

    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)
            .with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;
        AppConfig::from_raw(raw_json_config)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let pgdata_dir = raw
            .pgdata_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PGDATA_DIR));
        if !pgdata_dir.is_absolute() {
            anyhow::bail!(
                "pgdata_dir must be an absolute path, got {}",
                pgdata_dir.display()
            );
        }
        if pgdata_dir.parent().is_none() {
            anyhow::bail!("pgdata_dir cannot be the filesystem root.");
        }

        let mut restore = RestoreConfig::with_pgdata_dir(pgdata_dir);
        if let Some(wal_backup_dir) = raw.wal_backup_dir {
            restore.wal_backup_dir = wal_backup_dir;
        }
        if let Some(wal_tool) = raw.wal_tool {
            if wal_tool.trim().is_empty() {
                anyhow::bail!("wal_tool cannot be empty in config.json.");
            }
            restore.wal_tool = wal_tool;
        }
        if let Some(manager) = raw.service_manager {
            restore.service.manager = manager;
        }
        if let Some(name) = raw.service_name {
            if name.trim().is_empty() {
                anyhow::bail!("service_name cannot be empty in config.json.");
            }
            restore.service.name = name;
        }
        if let Some(path) = raw.free_space_check_path {
            restore.free_space_check_path = path;
        }
        if let Some(copy) = raw.copy_across_devices {
            restore.copy_across_devices = copy;
        }

        Ok(AppConfig {
            restore,
            log_file: raw
                .log_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        })
    }
}

/// Free space is measured on the filesystem holding the data directory's parent.
fn check_path_for(pgdata_dir: &Path) -> PathBuf {
    pgdata_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| pgdata_dir.to_path_buf())
}
