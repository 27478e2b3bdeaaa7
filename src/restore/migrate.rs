// pgdata-restorer/src/restore/migrate.rs
use chrono::Local;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::errors::MigrationError;

/// Name of the WAL directory inside a PostgreSQL data directory.
pub const PG_WAL_DIR: &str = "pg_wal";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Fall back to copy + delete when a rename crosses filesystems.
    pub copy_across_devices: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        MigrationOptions {
            copy_across_devices: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub data_entries: usize,
    pub wal_entries: usize,
}

/// Replaces `pgdata_dir` with the contents of `backup_dir`, then moves the
/// WAL backup tree under `pgdata_dir/pg_wal`.
///
/// The existing data directory is deleted without a copy being kept. When
/// `wal_backup_dir` sits inside `pgdata_dir` it is moved to a staging
/// directory next to `pgdata_dir` first so the wipe does not take it along.
/// A failure part-way leaves whatever was already moved in place.
pub fn migrate(
    backup_dir: &Path,
    pgdata_dir: &Path,
    wal_backup_dir: &Path,
    options: MigrationOptions,
) -> Result<MigrationSummary, MigrationError> {
    if !backup_dir.is_dir() {
        return Err(MigrationError::MissingBackupDir(backup_dir.to_path_buf()));
    }
    if is_within(backup_dir, pgdata_dir) {
        return Err(MigrationError::BackupInsideDataDir {
            backup: backup_dir.to_path_buf(),
            pgdata: pgdata_dir.to_path_buf(),
        });
    }
    // The wipe and the WAL staging directory both live below pgdata_dir's parent.
    if is_within(pgdata_dir, backup_dir) {
        return Err(MigrationError::BackupContainsDataDir {
            backup: backup_dir.to_path_buf(),
            pgdata: pgdata_dir.to_path_buf(),
        });
    }
    // A consumed backup whose root could not be removed (symlink, mount point) lands here.
    if !contains_files(backup_dir)? {
        return Err(MigrationError::EmptyBackupDir(backup_dir.to_path_buf()));
    }

    let wal_source = stage_wal_dir(wal_backup_dir, pgdata_dir, options)?;

    log::info!("[Restore] Removing existing data directory {}", pgdata_dir.display());
    match fs::remove_dir_all(pgdata_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(MigrationError::io("remove", pgdata_dir, e)),
    }
    create_private_dir_all(pgdata_dir)?;

    let mut summary = MigrationSummary {
        data_entries: relocate_tree(backup_dir, pgdata_dir, options)?,
        ..MigrationSummary::default()
    };
    log::info!(
        "[Restore] Moved {} entries from {} into {}",
        summary.data_entries,
        backup_dir.display(),
        pgdata_dir.display()
    );

    if let Some(wal_source) = wal_source {
        let pg_wal = pgdata_dir.join(PG_WAL_DIR);
        summary.wal_entries = relocate_tree(wal_source.path(), &pg_wal, options)?;
        log::info!(
            "[Restore] Moved {} WAL entries from {} into {}",
            summary.wal_entries,
            wal_source.path().display(),
            pg_wal.display()
        );
        wal_source.cleanup();
    }

    Ok(summary)
}

/// Where the WAL tree is read from once the data directory has been wiped.
enum WalSource {
    InPlace(PathBuf),
    Staged { root: PathBuf, wal: PathBuf },
}

impl WalSource {
    fn path(&self) -> &Path {
        match self {
            WalSource::InPlace(path) => path,
            WalSource::Staged { wal, .. } => wal,
        }
    }

    fn cleanup(self) {
        if let WalSource::Staged { root, .. } = self {
            if let Err(e) = fs::remove_dir(&root) {
                log::warn!("[Restore] Could not remove WAL staging directory {}: {}", root.display(), e);
            }
        }
    }
}

fn stage_wal_dir(
    wal_backup_dir: &Path,
    pgdata_dir: &Path,
    options: MigrationOptions,
) -> Result<Option<WalSource>, MigrationError> {
    if !wal_backup_dir.is_dir() {
        log::warn!(
            "[Restore] WAL backup directory {} not found, no WAL segments will be restored",
            wal_backup_dir.display()
        );
        return Ok(None);
    }
    if !is_within(wal_backup_dir, pgdata_dir) {
        return Ok(Some(WalSource::InPlace(wal_backup_dir.to_path_buf())));
    }

    let root = staging_root_for(pgdata_dir);
    let wal = root.join("wal");
    log::info!(
        "[Restore] Staging WAL backup {} at {} before wiping the data directory",
        wal_backup_dir.display(),
        wal.display()
    );
    create_private_dir_all(&wal)?;
    relocate_tree(wal_backup_dir, &wal, options)?;
    Ok(Some(WalSource::Staged { root, wal }))
}

fn staging_root_for(pgdata_dir: &Path) -> PathBuf {
    let name = pgdata_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pgdata".to_string());
    let timestamp = Local::now().format("%Y-%m-%d_%H_%M_%S");
    let staging_name = format!(".{}.wal-staging-{}", name, timestamp);
    match pgdata_dir.parent() {
        Some(parent) => parent.join(staging_name),
        None => PathBuf::from(staging_name),
    }
}

/// Moves every entry below `src_root` to the same relative path below
/// `dest_root`, then removes the emptied source directories.
///
/// Returns the number of files and links moved.
fn relocate_tree(
    src_root: &Path,
    dest_root: &Path,
    options: MigrationOptions,
) -> Result<usize, MigrationError> {
    // Collect up front so the walk never observes its own renames.
    let entries: Vec<DirEntry> = WalkDir::new(src_root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .collect::<Result<_, _>>()
        .map_err(|source| MigrationError::Walk {
            root: src_root.to_path_buf(),
            source,
        })?;

    let mut moved = 0;
    for entry in entries {
        let relative = entry.path().strip_prefix(src_root).map_err(|_| {
            MigrationError::io(
                "resolve relative path of",
                entry.path(),
                io::Error::new(io::ErrorKind::InvalidInput, "entry lies outside the walk root"),
            )
        })?;
        let dest = dest_root.join(relative);

        if entry.file_type().is_dir() {
            create_private_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            create_private_dir_all(parent)?;
        }
        move_entry(entry.path(), &dest, options)?;
        moved += 1;
    }

    prune_empty_dirs(src_root);
    Ok(moved)
}

/// True when at least one file or link sits anywhere below `root`.
fn contains_files(root: &Path) -> Result<bool, MigrationError> {
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|source| MigrationError::Walk {
            root: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_dir() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn move_entry(src: &Path, dest: &Path, options: MigrationOptions) -> Result<(), MigrationError> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if falls_back_to_copy(&e, options) => {
            log::debug!("Cross-device move of {}, copying instead", src.display());
            copy_then_remove(src, dest).map_err(|e| MigrationError::io("copy", src, e))
        }
        Err(e) => Err(MigrationError::io("move", src, e)),
    }
}

/// Whether a failed rename should be retried as copy + delete.
fn falls_back_to_copy(rename_error: &io::Error, options: MigrationOptions) -> bool {
    rename_error.kind() == io::ErrorKind::CrossesDevices && options.copy_across_devices
}

fn copy_then_remove(src: &Path, dest: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(src)?;
    if metadata.file_type().is_symlink() {
        if fs::symlink_metadata(dest).is_ok() {
            fs::remove_file(dest)?;
        }
        copy_symlink(src, dest)?;
    } else {
        fs::copy(src, dest)?;
    }
    fs::remove_file(src)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    let target = fs::read_link(src)?;
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot copy symlink {} across devices", src.display()),
    ))
}

/// Directories are created with mode 0700, which the server requires for its data directory.
fn create_private_dir_all(path: &Path) -> Result<(), MigrationError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(path)
        .map_err(|e| MigrationError::io("create directory", path, e))
}

/// Removes the directories left behind once their contents have been moved.
fn prune_empty_dirs(root: &Path) {
    for entry in WalkDir::new(root).contents_first(true).into_iter().flatten() {
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Err(e) = fs::remove_dir(entry.path()) {
            log::warn!(
                "[Restore] Could not remove emptied directory {}: {}",
                entry.path().display(),
                e
            );
        }
    }
}

fn is_within(path: &Path, dir: &Path) -> bool {
    canonical_or_raw(path).starts_with(canonical_or_raw(dir))
}

fn canonical_or_raw(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
