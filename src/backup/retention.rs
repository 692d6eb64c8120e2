use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local};
use walkdir::WalkDir;

use super::{io_error, is_backup_file_name, Result};
use crate::config::BackupConfig;

/// Which old backup files may be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Files older than this are candidates for deletion. 0 keeps everything.
    pub max_age_days: u32,
    /// Never go below this many backup files.
    pub min_keep: usize,
}

impl RetentionPolicy {
    pub fn from_config(config: &BackupConfig) -> Self {
        Self {
            max_age_days: config.retention_days,
            min_keep: config.min_keep,
        }
    }

    /// Delete expired backups in `dir`, oldest first, while more than
    /// `min_keep` remain. Returns the deleted paths.
    pub fn prune(&self, dir: &Path, now: DateTime<Local>) -> Result<Vec<PathBuf>> {
        if self.max_age_days == 0 || !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut backups = list_backups(dir);
        backups.sort_by_key(|(_, modified)| *modified);

        let cutoff = now - Duration::days(i64::from(self.max_age_days));
        let mut remaining = backups.len();
        let mut deleted = Vec::new();
        for (path, modified) in backups {
            if remaining <= self.min_keep || modified >= cutoff {
                break;
            }
            fs::remove_file(&path).map_err(io_error(&path))?;
            log::info!("Deleted old backup {}", path.display());
            remaining -= 1;
            deleted.push(path);
        }
        Ok(deleted)
    }
}

/// Backup files directly inside `dir` with their modification times.
fn list_backups(dir: &Path) -> Vec<(PathBuf, DateTime<Local>)> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_str().is_some_and(is_backup_file_name))
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.into_path(), DateTime::<Local>::from(modified)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs::File;
    use std::time::SystemTime;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
    }

    fn backup_aged(dir: &Path, name: &str, days_old: i64) -> PathBuf {
        let path = dir.join(name);
        let f = File::create(&path).unwrap();
        f.set_modified(SystemTime::from(now() - Duration::days(days_old)))
            .unwrap();
        path
    }

    #[test]
    fn test_prunes_expired_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let oldest = backup_aged(dir.path(), "RL_Backup_20240101-0330.xml", 180);
        let old = backup_aged(dir.path(), "RL_Backup_20240301-0330.xml", 120);
        let recent = backup_aged(dir.path(), "RL_Backup_20240625-0330.xml", 5);
        let policy = RetentionPolicy { max_age_days: 30, min_keep: 1 };

        let deleted = policy.prune(dir.path(), now()).unwrap();
        assert_eq!(deleted, vec![oldest, old]);
        assert!(recent.exists());
    }

    #[test]
    fn test_min_keep_wins_over_age() {
        let dir = tempfile::tempdir().unwrap();
        let oldest = backup_aged(dir.path(), "RL_Backup_20240101-0330.xml", 180);
        let old = backup_aged(dir.path(), "RL_Backup_20240102-0330.xml", 179);
        let policy = RetentionPolicy { max_age_days: 30, min_keep: 1 };

        let deleted = policy.prune(dir.path(), now()).unwrap();
        assert_eq!(deleted, vec![oldest]);
        assert!(old.exists());
    }

    #[test]
    fn test_only_backup_files_considered() {
        let dir = tempfile::tempdir().unwrap();
        let other = backup_aged(dir.path(), "notes.xml", 365);
        let playlist = backup_aged(dir.path(), "Rated 5 stars.m3u", 365);
        backup_aged(dir.path(), "RL_Backup_20240101-0330.xml", 180);
        let policy = RetentionPolicy { max_age_days: 30, min_keep: 0 };

        let deleted = policy.prune(dir.path(), now()).unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(other.exists());
        assert!(playlist.exists());
    }

    #[test]
    fn test_zero_age_disables_and_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        backup_aged(dir.path(), "RL_Backup_20240101-0330.xml", 180);
        let keep_all = RetentionPolicy { max_age_days: 0, min_keep: 0 };
        assert!(keep_all.prune(dir.path(), now()).unwrap().is_empty());

        let policy = RetentionPolicy { max_age_days: 30, min_keep: 0 };
        assert!(policy.prune(&dir.path().join("missing"), now()).unwrap().is_empty());
    }
}
