//! Export ratings as one playlist file per star bucket.

use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

use crate::config::AppConfig;
use crate::db::models::CommentedRating;
use crate::db::Database;
use crate::import::KeywordPattern;
use crate::ops::{Coordinator, OperationKind};
use crate::rating::{Rating, STAR};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Database error: {0}")]
    Db(#[from] crate::db::DbError),
}

pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub dir: PathBuf,
    /// Only tracks whose comment keyword disagrees with their rating.
    pub only_mismatched: bool,
    pub keywords: KeywordPattern,
}

impl ExportOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            dir: config.export_dir(),
            only_mismatched: config.export.only_mismatched,
            keywords: KeywordPattern::from_config(config),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub files: Vec<PathBuf>,
    pub exported: usize,
}

/// Rating range `[min, max)` of a whole-star bucket (1–5).
pub fn bucket_range(stars: u8) -> (i64, i64) {
    let center = i64::from(stars) * i64::from(STAR);
    let max = if stars >= 5 { 101 } else { center + 10 };
    (center - 10, max)
}

pub fn playlist_file_name(stars: u8, now: &DateTime<Local>) -> String {
    format!("RL_Export_{}_{stars}stars.m3u", now.format("%Y%m%d-%H%M"))
}

fn render_playlist(
    stars: u8,
    tracks: &[CommentedRating],
    options: &ExportOptions,
    now: &DateTime<Local>,
) -> String {
    let (min, max) = bucket_range(stars);
    let mut out = String::from("#EXTM3U\n");
    let _ = writeln!(
        out,
        "# {} export {}: tracks rated {} ({min}-{})",
        crate::DISPLAY_NAME,
        now.format("%Y-%m-%d %H:%M"),
        Rating::from_stars(f64::from(stars)).to_star_text(false),
        (max - 1).min(100),
    );
    if options.only_mismatched {
        let _ = writeln!(
            out,
            "# Only tracks whose rating differs from their comment keyword\n\
             # (e.g. {}), or that have none",
            options.keywords.keyword(f64::from(stars)),
        );
    }
    for track in tracks {
        let _ = writeln!(out, "#EXTURL:{}", track.url);
        let _ = writeln!(out, "{}", track.url);
    }
    out
}

fn is_mismatched(track: &CommentedRating, keywords: &KeywordPattern) -> bool {
    let tagged = track.comments.as_deref().and_then(|c| keywords.rating_in(c));
    tagged != Some(Rating::clamped(track.rating))
}

fn write_playlist(path: &Path, contents: &str) -> Result<()> {
    let io = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io)?;
    }
    fs::write(path, contents).map_err(io)
}

/// Write one playlist per star bucket holding rated tracks. Empty
/// buckets produce no file. `Ok(None)` if an export is already running.
pub fn export_playlists(
    db: &Database,
    coordinator: &Arc<Coordinator>,
    options: &ExportOptions,
    now: DateTime<Local>,
) -> Result<Option<ExportReport>> {
    let Some(_guard) = coordinator.try_begin(OperationKind::Export) else {
        return Ok(None);
    };

    let mut report = ExportReport::default();
    for stars in 1..=5u8 {
        let (min, max) = bucket_range(stars);
        let mut tracks = db.ratings_with_comments(min, max)?;
        if options.only_mismatched {
            tracks.retain(|t| is_mismatched(t, &options.keywords));
        }
        if tracks.is_empty() {
            continue;
        }
        let path = options.dir.join(playlist_file_name(stars, &now));
        write_playlist(&path, &render_playlist(stars, &tracks, options, &now))?;
        log::info!("Exported {} tracks to {}", tracks.len(), path.display());
        report.exported += tracks.len();
        report.files.push(path);
    }
    if report.files.is_empty() {
        log::info!("Nothing to export");
    }
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewTrack;
    use crate::db::url_md5;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 20, 15, 0).unwrap()
    }

    fn rate(db: &Database, url: &str, rating: i64, comment: Option<&str>) {
        let id = db
            .insert_track(&NewTrack {
                url: url.into(),
                ..Default::default()
            })
            .unwrap();
        if let Some(c) = comment {
            db.add_comment(id, c).unwrap();
        }
        Database::store_rating_row(&db.conn, url, &url_md5(url), Some(rating)).unwrap();
    }

    fn options(dir: &Path, only_mismatched: bool) -> ExportOptions {
        ExportOptions {
            dir: dir.to_path_buf(),
            only_mismatched,
            keywords: KeywordPattern::new("favstars", "", false),
        }
    }

    #[test]
    fn test_bucket_ranges() {
        assert_eq!(bucket_range(1), (10, 30));
        assert_eq!(bucket_range(4), (70, 90));
        assert_eq!(bucket_range(5), (90, 101));
    }

    #[test]
    fn test_one_file_per_nonempty_bucket() {
        let db = Database::open_in_memory().unwrap();
        let ops = Coordinator::new();
        rate(&db, "file:///a.flac", 100, None);
        rate(&db, "file:///b.flac", 90, None);
        rate(&db, "file:///c.flac", 40, None);
        let dir = tempfile::tempdir().unwrap();

        let report = export_playlists(&db, &ops, &options(dir.path(), false), now())
            .unwrap()
            .unwrap();
        assert_eq!(report.exported, 3);
        assert_eq!(report.files.len(), 2);

        let five = fs::read_to_string(dir.path().join("RL_Export_20240501-2015_5stars.m3u")).unwrap();
        assert!(five.starts_with("#EXTM3U\n# Ratings Light export"));
        assert!(five.contains("#EXTURL:file:///a.flac\nfile:///a.flac\n"));
        assert!(five.contains("#EXTURL:file:///b.flac\n"));
        assert!(!dir.path().join("RL_Export_20240501-2015_1stars.m3u").exists());
    }

    #[test]
    fn test_only_mismatched() {
        let db = Database::open_in_memory().unwrap();
        let ops = Coordinator::new();
        rate(&db, "file:///agrees.flac", 80, Some("favstars4"));
        rate(&db, "file:///disagrees.flac", 80, Some("favstars2"));
        rate(&db, "file:///untagged.flac", 80, None);
        let dir = tempfile::tempdir().unwrap();

        let report = export_playlists(&db, &ops, &options(dir.path(), true), now())
            .unwrap()
            .unwrap();
        assert_eq!(report.exported, 2);
        let four = fs::read_to_string(&report.files[0]).unwrap();
        assert!(four.contains("# Only tracks whose rating differs"));
        assert!(!four.contains("file:///agrees.flac"));
        assert!(four.contains("file:///disagrees.flac"));
        assert!(four.contains("file:///untagged.flac"));
    }

    #[test]
    fn test_concurrent_export_rejected() {
        let db = Database::open_in_memory().unwrap();
        let ops = Coordinator::new();
        rate(&db, "file:///a.flac", 100, None);
        let dir = tempfile::tempdir().unwrap();
        let _held = ops.try_begin(OperationKind::Export).unwrap();
        assert!(export_playlists(&db, &ops, &options(dir.path(), false), now())
            .unwrap()
            .is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
