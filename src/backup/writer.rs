use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};

use super::retention::RetentionPolicy;
use super::{backup_file_name, io_error, relative_path, Result, TrackRatingRecord, ROOT_ELEMENT};
use crate::config::AppConfig;
use crate::db::Database;
use crate::ops::{Coordinator, OperationKind};

#[derive(Debug, Clone, serde::Serialize)]
pub struct BackupReport {
    pub path: PathBuf,
    pub written: usize,
    /// Rated entries left out: gone from the catalog, or remote without an online id.
    pub ignored: usize,
    /// Old backups deleted by retention afterwards.
    pub pruned: Vec<PathBuf>,
}

/// Rated tracks worth backing up, plus the count of those skipped.
pub fn collect_records(db: &Database, media_dirs: &[PathBuf]) -> Result<(Vec<TrackRatingRecord>, usize)> {
    let mut records = Vec::new();
    let mut ignored = 0;
    for row in db.rated_rows()? {
        match db.catalog_by_md5(&row.urlmd5)? {
            Some(track) if track.is_restorable() => records.push(TrackRatingRecord {
                relurl: relative_path(&track.url, media_dirs),
                url: track.url,
                rating: row.rating,
                remote: track.remote,
            }),
            Some(track) => {
                log::debug!("Skipping remote track without online id: {}", track.url);
                ignored += 1;
            }
            None => {
                log::debug!("Skipping rating of track no longer in library: {}", row.url);
                ignored += 1;
            }
        }
    }
    Ok((records, ignored))
}

/// Render a complete backup document.
pub fn generate_document(records: &[TrackRatingRecord], ignored: usize, now: &DateTime<Local>) -> String {
    let mut out = String::with_capacity(records.len() * 160 + 256);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(out, "<!-- Backup of Rating Values ({}) -->", crate::DISPLAY_NAME);
    let _ = writeln!(out, "<!-- {} -->", now.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "<{ROOT_ELEMENT}>");
    for record in records {
        out.push_str(&record.to_xml_line());
    }
    let _ = writeln!(out, "</{ROOT_ELEMENT}>");
    if ignored > 0 {
        let _ = writeln!(
            out,
            "<!-- WARNING! {ignored} tracks ignored (dead or remote without online id) -->"
        );
    }
    let _ = writeln!(out, "<!-- This backup contains {} rated tracks -->", records.len());
    out
}

fn write_document(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    fs::write(path, contents).map_err(io_error(path))
}

/// Back up every rating to a new file in the backup directory, then
/// apply retention. `Ok(None)` if a backup is already running.
pub fn write_backup(
    db: &Database,
    coordinator: &Arc<Coordinator>,
    config: &AppConfig,
    now: DateTime<Local>,
) -> Result<Option<BackupReport>> {
    let Some(_guard) = coordinator.try_begin(OperationKind::Backup) else {
        return Ok(None);
    };

    let (records, ignored) = collect_records(db, &config.media_dirs)?;
    let dir = config.backup_dir();
    let path = dir.join(backup_file_name(&now));
    write_document(&path, &generate_document(&records, ignored, &now))?;
    if ignored > 0 {
        log::warn!("{ignored} rated tracks left out of backup");
    }
    log::info!("Backed up {} ratings to {}", records.len(), path.display());

    let policy = RetentionPolicy::from_config(&config.backup);
    let pruned = match policy.prune(&dir, now) {
        Ok(pruned) => pruned,
        Err(e) => {
            log::error!("Failed to prune old backups in {}: {e}", dir.display());
            Vec::new()
        }
    };

    Ok(Some(BackupReport {
        path,
        written: records.len(),
        ignored,
        pruned,
    }))
}
