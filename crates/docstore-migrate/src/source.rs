//! Locating the data to migrate.
//!
//! Backups sit next to the live store as `{name}.backup*` or
//! `{name}_backup*`. A store's age is the newest modification time of any
//! file inside it; the newest backup wins over the live store when its data
//! was written more recently.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::info;
use walkdir::WalkDir;

use crate::error::MigrationError;

/// Latest write to anything in the store at `path`. A store with no files
/// falls back to its own modification time; `None` if it does not exist.
fn last_written(path: &Path) -> Option<SystemTime> {
    let own = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let newest_file = WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok()?.modified().ok())
        .max();
    Some(newest_file.unwrap_or(own))
}

/// Backup snapshots of `source`, newest first.
pub fn find_backups(source: &Path) -> Result<Vec<PathBuf>, MigrationError> {
    let Some(name) = source.file_name().and_then(|n| n.to_str()) else {
        return Ok(Vec::new());
    };
    let parent = match source.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !parent.is_dir() {
        return Ok(Vec::new());
    }

    let dotted = format!("{}.backup", name);
    let underscored = format!("{}_backup", name);
    let mut backups: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(&parent)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !(file_name.starts_with(&dotted) || file_name.starts_with(&underscored)) {
            continue;
        }
        let path = entry.path();
        if let Some(time) = last_written(&path) {
            backups.push((time, path));
        }
    }
    backups.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(backups.into_iter().map(|(_, path)| path).collect())
}

/// The path to migrate from: the newest backup if it is newer than
/// `source`, otherwise `source` itself.
pub fn locate_source(source: &Path) -> Result<PathBuf, MigrationError> {
    let backups = find_backups(source)?;
    let live = last_written(source);

    if let Some(newest) = backups.first() {
        let newer = match (last_written(newest), live) {
            (Some(backup_time), Some(live_time)) => backup_time > live_time,
            (Some(_), None) => true,
            _ => false,
        };
        if newer {
            info!(backup = %newest.display(), "Using newer backup as migration source");
            return Ok(newest.clone());
        }
    }

    if live.is_none() {
        return Err(MigrationError::SourceNotFound(source.to_path_buf()));
    }
    Ok(source.to_path_buf())
}
