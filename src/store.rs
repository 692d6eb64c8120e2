//! RatingStore: the only code path that writes `tracks_persistent.rating`.

use std::sync::Arc;

use crate::db::{url_md5, Database};
use crate::host::ScanGate;
use crate::ops::{Coordinator, OperationKind};
use crate::rating::Rating;

pub struct RatingStore {
    db: Database,
    gate: Arc<dyn ScanGate>,
    ops: Arc<Coordinator>,
}

impl RatingStore {
    pub fn new(db: Database, gate: Arc<dyn ScanGate>, ops: Arc<Coordinator>) -> Self {
        Self { db, gate, ops }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.ops
    }

    pub fn is_scanning(&self) -> bool {
        self.gate.is_scanning()
    }

    /// Set the rating of the track at `url`, clamped to 0–100 (0 clears it).
    ///
    /// Failures are logged, never returned. Returns whether the write
    /// was committed.
    pub fn write(&self, url: &str, rating: i64) -> bool {
        if self.gate.is_scanning() {
            log::warn!("Library scan in progress, not rating {url}");
            return false;
        }
        let rating = Rating::clamped(rating);
        let stored = rating.is_rated().then(|| i64::from(rating));
        let urlmd5 = url_md5(url);

        let tx = match self.db.conn.unchecked_transaction() {
            Ok(tx) => tx,
            Err(e) => {
                log::error!("Failed to start transaction for {url}: {e}");
                return false;
            }
        };
        if let Err(e) = Database::store_rating_row(&tx, url, &urlmd5, stored) {
            log::error!("Failed to rate {url}: {e}");
            if let Err(e) = tx.rollback() {
                log::error!("Rollback failed: {e}");
            }
            return false;
        }
        match tx.commit() {
            Ok(()) => {
                log::debug!("Rated {url}: {rating}");
                true
            }
            Err(e) => {
                log::error!("Failed to commit rating for {url}: {e}");
                false
            }
        }
    }

    /// Rating of the track at `url`. Unrated on a missing row, a database
    /// error, or while the library is being scanned.
    pub fn read(&self, url: &str) -> Rating {
        if self.gate.is_scanning() {
            log::warn!("Library scan in progress, not reading rating of {url}");
            return Rating::UNRATED;
        }
        match self.db.rating_by_md5(&url_md5(url)) {
            Ok(Some(r)) => Rating::clamped(r),
            Ok(None) => Rating::UNRATED,
            Err(e) => {
                log::error!("Failed to read rating of {url}: {e}");
                Rating::UNRATED
            }
        }
    }

    /// Clear every rating. Rejected while another clear is running or
    /// while the library is being scanned. Returns whether it committed.
    pub fn clear_all(&self) -> bool {
        let Some(_guard) = self.ops.try_begin(OperationKind::ClearAll) else {
            return false;
        };
        self.clear_all_unguarded()
    }

    /// Bulk clear for operations that already hold their own guard
    /// (restore and import clear first when configured to).
    pub(crate) fn clear_all_unguarded(&self) -> bool {
        if self.gate.is_scanning() {
            log::warn!("Library scan in progress, not clearing ratings");
            return false;
        }
        let tx = match self.db.conn.unchecked_transaction() {
            Ok(tx) => tx,
            Err(e) => {
                log::error!("Failed to start transaction: {e}");
                return false;
            }
        };
        match Database::clear_rating_rows(&tx) {
            Ok(n) => match tx.commit() {
                Ok(()) => {
                    log::info!("Cleared {n} ratings");
                    true
                }
                Err(e) => {
                    log::error!("Failed to commit clearing ratings: {e}");
                    false
                }
            },
            Err(e) => {
                log::error!("Failed to clear ratings: {e}");
                if let Err(e) = tx.rollback() {
                    log::error!("Rollback failed: {e}");
                }
                false
            }
        }
    }

    /// Give every url the same rating (rating a whole playlist).
    /// Returns how many writes committed, or `None` if a batch is already running.
    pub fn rate_urls(&self, urls: &[String], rating: i64) -> Option<usize> {
        let _guard = self.ops.try_begin(OperationKind::BatchRate)?;
        let written = urls.iter().filter(|url| self.write(url, rating)).count();
        log::info!("Rated {written} of {} tracks", urls.len());
        Some(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewTrack;
    use crate::host::ScanFlag;

    fn store() -> (RatingStore, Arc<ScanFlag>) {
        let db = Database::open_in_memory().unwrap();
        let flag = Arc::new(ScanFlag::new());
        let store = RatingStore::new(db, flag.clone(), Coordinator::new());
        (store, flag)
    }

    #[test]
    fn test_write_then_read() {
        let (store, _) = store();
        assert!(store.write("file:///a.mp3", 37));
        assert_eq!(store.read("file:///a.mp3").value(), 37);
    }

    #[test]
    fn test_write_clamps() {
        let (store, _) = store();
        store.write("file:///low.mp3", -20);
        store.write("file:///high.mp3", 150);
        assert_eq!(store.read("file:///low.mp3").value(), 0);
        assert_eq!(store.read("file:///high.mp3").value(), 100);

        let stored: Option<i64> = store
            .db()
            .conn
            .query_row(
                "SELECT rating FROM tracks_persistent WHERE url = 'file:///high.mp3'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, Some(100));
    }

    #[test]
    fn test_zero_clears_to_null() {
        let (store, _) = store();
        store.write("file:///a.mp3", 80);
        store.write("file:///a.mp3", 0);
        let stored: Option<i64> = store
            .db()
            .conn
            .query_row(
                "SELECT rating FROM tracks_persistent WHERE url = 'file:///a.mp3'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, None);
        assert_eq!(store.read("file:///a.mp3"), Rating::UNRATED);
    }

    #[test]
    fn test_write_updates_existing_persistent_row() {
        let (store, _) = store();
        store
            .db()
            .insert_track(&NewTrack {
                url: "file:///a.mp3".into(),
                playcount: Some(4),
                ..Default::default()
            })
            .unwrap();
        store.write("file:///a.mp3", 60);
        let (rating, playcount): (i64, i64) = store
            .db()
            .conn
            .query_row(
                "SELECT rating, playcount FROM tracks_persistent WHERE url = 'file:///a.mp3'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!((rating, playcount), (60, 4));
    }

    #[test]
    fn test_scan_blocks_reads_and_writes() {
        let (store, flag) = store();
        store.write("file:///a.mp3", 60);
        flag.set(true);
        assert_eq!(store.read("file:///a.mp3"), Rating::UNRATED);
        assert!(!store.write("file:///a.mp3", 20));
        assert!(!store.clear_all());
        flag.set(false);
        assert_eq!(store.read("file:///a.mp3").value(), 60);
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let (store, _) = store();
        store.db().conn.execute_batch("DROP TABLE tracks_persistent").unwrap();
        assert!(!store.write("file:///a.mp3", 60));
        assert_eq!(store.read("file:///a.mp3"), Rating::UNRATED);
        assert!(store.db().is_autocommit());
    }

    #[test]
    fn test_clear_all() {
        let (store, _) = store();
        store.write("file:///a.mp3", 60);
        store.write("file:///b.mp3", 100);
        assert!(store.clear_all());
        assert_eq!(store.read("file:///a.mp3"), Rating::UNRATED);
        assert_eq!(store.read("file:///b.mp3"), Rating::UNRATED);
    }

    #[test]
    fn test_clear_all_rejected_while_running() {
        let (store, _) = store();
        store.write("file:///a.mp3", 60);
        let _held = store.coordinator().try_begin(OperationKind::ClearAll).unwrap();
        assert!(!store.clear_all());
        assert_eq!(store.read("file:///a.mp3").value(), 60);
    }

    #[test]
    fn test_rate_urls() {
        let (store, _) = store();
        let urls = vec!["file:///a.mp3".to_string(), "file:///b.mp3".to_string()];
        assert_eq!(store.rate_urls(&urls, 80), Some(2));
        assert_eq!(store.read("file:///b.mp3").value(), 80);

        let _held = store.coordinator().try_begin(OperationKind::BatchRate).unwrap();
        assert_eq!(store.rate_urls(&urls, 20), None);
        assert_eq!(store.read("file:///a.mp3").value(), 80);
    }
}
