use super::models::{
    CatalogTrack, CommentedRating, NewTrack, RatedRow, RatedTrack, RatingStats,
};
use super::{url_md5, Database, Result};
use crate::rating::Rating;
use rusqlite::{params, Connection, OptionalExtension};

impl Database {
    /// Add a track and its persistent row. Returns the track id.
    pub fn insert_track(&self, t: &NewTrack) -> Result<i64> {
        let md5 = url_md5(&t.url);
        self.conn.execute(
            "INSERT INTO tracks (url, urlmd5, title, year, secs, remote, extid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                year = excluded.year,
                secs = excluded.secs,
                remote = excluded.remote,
                extid = excluded.extid",
            params![t.url, md5, t.title, t.year, t.secs, t.remote, t.extid],
        )?;
        self.conn.execute(
            "INSERT INTO tracks_persistent (url, urlmd5, playcount, added)
             VALUES (?1, ?2, ?3, strftime('%s', 'now'))
             ON CONFLICT(urlmd5) DO UPDATE SET playcount = excluded.playcount",
            params![t.url, md5, t.playcount],
        )?;

        let id: i64 = self.conn.query_row(
            "SELECT id FROM tracks WHERE url = ?1",
            params![t.url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Remove a track from the catalog. The persistent row stays, as it
    /// does when a file disappears from a server library.
    pub fn remove_track(&self, track_id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM tracks WHERE id = ?1", params![track_id])?;
        Ok(())
    }

    /// Tag a track with a genre, creating the genre if needed. Returns the genre id.
    pub fn add_genre(&self, track_id: i64, name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO genres (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            params![name],
        )?;
        let genre_id: i64 = self.conn.query_row(
            "SELECT id FROM genres WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        self.conn.execute(
            "INSERT OR IGNORE INTO genre_track (genre, track) VALUES (?1, ?2)",
            params![genre_id, track_id],
        )?;
        Ok(genre_id)
    }

    pub fn add_comment(&self, track_id: i64, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO comments (track, value) VALUES (?1, ?2)",
            params![track_id, value],
        )?;
        Ok(())
    }

    /// Credit a track to an artist, creating the artist if needed. Returns the artist id.
    pub fn add_artist(&self, track_id: i64, name: &str) -> Result<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM contributors WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        let artist_id = match existing {
            Some(id) => id,
            None => {
                self.conn
                    .execute("INSERT INTO contributors (name) VALUES (?1)", params![name])?;
                self.conn.last_insert_rowid()
            }
        };
        self.conn.execute(
            "INSERT OR IGNORE INTO contributor_track (contributor, track, role) VALUES (?1, ?2, 1)",
            params![artist_id, track_id],
        )?;
        Ok(artist_id)
    }

    pub fn add_to_library(&self, library: &str, track_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO library_track (library, track) VALUES (?1, ?2)",
            params![library, track_id],
        )?;
        Ok(())
    }

    pub fn add_to_playlist(&self, playlist_id: i64, url: &str, position: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO playlist_track (playlist, track, position) VALUES (?1, ?2, ?3)",
            params![playlist_id, url, position],
        )?;
        Ok(())
    }

    /// Look up a catalog track by url.
    pub fn catalog_by_url(&self, url: &str) -> Result<Option<CatalogTrack>> {
        self.catalog_where("url = ?1", url)
    }

    /// Look up a catalog track by the md5 of its url.
    pub fn catalog_by_md5(&self, urlmd5: &str) -> Result<Option<CatalogTrack>> {
        self.catalog_where("urlmd5 = ?1", urlmd5)
    }

    pub fn catalog_by_id(&self, track_id: i64) -> Result<Option<CatalogTrack>> {
        self.catalog_where("id = ?1", track_id)
    }

    fn catalog_where<P: rusqlite::ToSql>(&self, predicate: &str, key: P) -> Result<Option<CatalogTrack>> {
        let sql = format!(
            "SELECT id, url, title, remote, extid FROM tracks WHERE {predicate} LIMIT 1"
        );
        let track = self
            .conn
            .query_row(&sql, params![key], |row| {
                Ok(CatalogTrack {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    title: row.get(2)?,
                    remote: row.get(3)?,
                    extid: row.get(4)?,
                })
            })
            .optional()?;
        Ok(track)
    }

    /// All persistent rows with a positive rating, in url order.
    pub fn rated_rows(&self) -> Result<Vec<RatedRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, urlmd5, rating FROM tracks_persistent
             WHERE rating > 0
             ORDER BY url",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RatedRow {
                    url: row.get(0)?,
                    urlmd5: row.get(1)?,
                    rating: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Stored rating for a url hash. `None` when there is no row or the
    /// rating is NULL.
    pub fn rating_by_md5(&self, urlmd5: &str) -> Result<Option<i64>> {
        let rating: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT rating FROM tracks_persistent WHERE urlmd5 = ?1",
                params![urlmd5],
                |row| row.get(0),
            )
            .optional()?;
        Ok(rating.flatten())
    }

    /// Write one rating (used within a transaction). `None` clears it.
    pub(crate) fn store_rating_row(
        conn: &Connection,
        url: &str,
        urlmd5: &str,
        rating: Option<i64>,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO tracks_persistent (url, urlmd5, rating, added)
             VALUES (?1, ?2, ?3, strftime('%s', 'now'))
             ON CONFLICT(urlmd5) DO UPDATE SET rating = excluded.rating",
            params![url, urlmd5, rating],
        )?;
        Ok(())
    }

    /// Clear every positive rating (used within a transaction). Returns rows touched.
    pub(crate) fn clear_rating_rows(conn: &Connection) -> Result<usize> {
        let n = conn.execute(
            "UPDATE tracks_persistent SET rating = NULL WHERE rating > 0",
            [],
        )?;
        Ok(n)
    }

    /// Urls of audio tracks with a comment matching a LIKE pattern
    /// (`\` escapes, see [`super::like_contains`]).
    pub fn urls_with_comment_like(&self, pattern: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT tracks.url FROM tracks
             JOIN comments ON comments.track = tracks.id
             WHERE tracks.audio = 1 AND comments.value LIKE ?1 ESCAPE '\\'
             ORDER BY tracks.url",
        )?;
        let urls = stmt
            .query_map(params![pattern], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(urls)
    }

    /// Rated tracks in `[min, max)` with their comment text.
    pub fn ratings_with_comments(&self, min: i64, max: i64) -> Result<Vec<CommentedRating>> {
        let mut stmt = self.conn.prepare(
            "SELECT tracks_persistent.url, tracks_persistent.rating,
                    group_concat(comments.value, ' ')
             FROM tracks_persistent
             LEFT JOIN tracks ON tracks.urlmd5 = tracks_persistent.urlmd5
             LEFT JOIN comments ON comments.track = tracks.id
             WHERE tracks_persistent.rating >= ?1 AND tracks_persistent.rating < ?2
             GROUP BY tracks_persistent.urlmd5
             ORDER BY tracks_persistent.url",
        )?;
        let rows = stmt
            .query_map(params![min, max], |row| {
                Ok(CommentedRating {
                    url: row.get(0)?,
                    rating: row.get(1)?,
                    comments: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Other rated tracks by the artists of `track_id`, best first.
    pub fn rated_by_same_artist(&self, track_id: i64, limit: usize) -> Result<Vec<RatedTrack>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT tracks.id, tracks.url, tracks.title, tracks_persistent.rating
             FROM tracks
             JOIN tracks_persistent ON tracks_persistent.urlmd5 = tracks.urlmd5
             JOIN contributor_track ON contributor_track.track = tracks.id
             WHERE contributor_track.contributor IN (
                    SELECT contributor FROM contributor_track WHERE track = ?1
                 )
               AND tracks.id != ?1
               AND tracks_persistent.rating > 0
             ORDER BY tracks_persistent.rating DESC, tracks.title
             LIMIT ?2",
        )?;
        let tracks = stmt
            .query_map(params![track_id, limit as i64], |row| {
                Ok(RatedTrack {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    title: row.get(2)?,
                    rating: Rating::clamped(row.get(3)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tracks)
    }

    /// Track urls of a saved playlist, in playlist order.
    pub fn playlist_urls(&self, playlist_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT track FROM playlist_track WHERE playlist = ?1 ORDER BY position",
        )?;
        let urls = stmt
            .query_map(params![playlist_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(urls)
    }

    /// Append played tracks to a client's history and trim it to the
    /// newest `keep` entries.
    pub fn record_history(&self, client: &str, tracks: &[(i64, String)], keep: usize) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO dynamicplaylist_history (client, id, url, added)
                 VALUES (?1, ?2, ?3, strftime('%s', 'now'))",
            )?;
            for (id, url) in tracks {
                stmt.execute(params![client, id, url])?;
            }
        }
        tx.execute(
            "DELETE FROM dynamicplaylist_history
             WHERE client = ?1 AND rowid NOT IN (
                SELECT rowid FROM dynamicplaylist_history
                WHERE client = ?1
                ORDER BY rowid DESC
                LIMIT ?2
             )",
            params![client, keep as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn history_len(&self, client: &str) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM dynamicplaylist_history WHERE client = ?1",
            params![client],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Get rating statistics for the library.
    pub fn rating_stats(&self) -> Result<RatingStats> {
        let total_tracks: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tracks WHERE audio = 1",
            [],
            |row| row.get(0),
        )?;

        let mut stats = RatingStats {
            total_tracks,
            ..Default::default()
        };

        let mut stmt = self.conn.prepare(
            "SELECT rating FROM tracks_persistent WHERE rating > 0",
        )?;
        let ratings = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for r in ratings {
            stats.rated_tracks += 1;
            let bucket = Rating::clamped(r).star_bucket();
            if bucket > 0 {
                stats.by_stars[bucket as usize - 1] += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(url: &str) -> NewTrack {
        NewTrack {
            url: url.to_string(),
            title: Some(url.rsplit('/').next().unwrap_or(url).to_string()),
            year: Some(1977),
            secs: Some(300.0),
            ..Default::default()
        }
    }

    fn set_rating(db: &Database, url: &str, rating: i64) {
        Database::store_rating_row(&db.conn, url, &url_md5(url), Some(rating)).unwrap();
    }

    #[test]
    fn test_insert_and_lookup() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_track(&track("file:///music/a.mp3")).unwrap();
        assert!(id > 0);

        let by_url = db.catalog_by_url("file:///music/a.mp3").unwrap().unwrap();
        assert_eq!(by_url.id, id);
        let by_md5 = db.catalog_by_md5(&url_md5("file:///music/a.mp3")).unwrap().unwrap();
        assert_eq!(by_md5, by_url);
        assert_eq!(db.catalog_by_id(id).unwrap(), Some(by_url));
        assert!(db.catalog_by_url("file:///music/missing.mp3").unwrap().is_none());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let id1 = db.insert_track(&track("file:///music/a.mp3")).unwrap();
        let id2 = db.insert_track(&track("file:///music/a.mp3")).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(db.rating_stats().unwrap().total_tracks, 1);
    }

    #[test]
    fn test_rated_rows_only_positive() {
        let db = Database::open_in_memory().unwrap();
        db.insert_track(&track("file:///music/a.mp3")).unwrap();
        db.insert_track(&track("file:///music/b.mp3")).unwrap();
        set_rating(&db, "file:///music/b.mp3", 60);

        let rows = db.rated_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "file:///music/b.mp3");
        assert_eq!(rows[0].rating, 60);
        assert_eq!(db.rating_by_md5(&url_md5("file:///music/a.mp3")).unwrap(), None);
    }

    #[test]
    fn test_clear_rating_rows() {
        let db = Database::open_in_memory().unwrap();
        set_rating(&db, "file:///music/a.mp3", 20);
        set_rating(&db, "file:///music/b.mp3", 100);
        assert_eq!(Database::clear_rating_rows(&db.conn).unwrap(), 2);
        assert!(db.rated_rows().unwrap().is_empty());
    }

    #[test]
    fn test_remove_track_keeps_persistent_rating() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_track(&track("file:///music/a.mp3")).unwrap();
        set_rating(&db, "file:///music/a.mp3", 80);
        db.remove_track(id).unwrap();
        assert!(db.catalog_by_id(id).unwrap().is_none());
        assert_eq!(db.rated_rows().unwrap().len(), 1);
    }

    #[test]
    fn test_rated_by_same_artist() {
        let db = Database::open_in_memory().unwrap();
        let a = db.insert_track(&track("file:///music/a.mp3")).unwrap();
        let b = db.insert_track(&track("file:///music/b.mp3")).unwrap();
        let c = db.insert_track(&track("file:///music/c.mp3")).unwrap();
        let d = db.insert_track(&track("file:///music/d.mp3")).unwrap();
        for id in [a, b, c] {
            db.add_artist(id, "Grateful Dead").unwrap();
        }
        db.add_artist(d, "Phish").unwrap();
        set_rating(&db, "file:///music/a.mp3", 40);
        set_rating(&db, "file:///music/b.mp3", 100);
        set_rating(&db, "file:///music/d.mp3", 100);

        let more = db.rated_by_same_artist(a, 10).unwrap();
        // c is unrated, d is by another artist, a itself is excluded
        assert_eq!(more.len(), 1);
        assert_eq!(more[0].id, b);
        assert_eq!(more[0].rating.value(), 100);
    }

    #[test]
    fn test_history_is_trimmed_per_client() {
        let db = Database::open_in_memory().unwrap();
        let tracks: Vec<(i64, String)> = (1..=5).map(|i| (i, format!("file:///{i}.mp3"))).collect();
        db.record_history("kitchen", &tracks, 3).unwrap();
        db.record_history("office", &tracks[..2], 3).unwrap();
        assert_eq!(db.history_len("kitchen").unwrap(), 3);
        assert_eq!(db.history_len("office").unwrap(), 2);

        let newest: Vec<i64> = db
            .conn
            .prepare("SELECT id FROM dynamicplaylist_history WHERE client = 'kitchen' ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(newest, vec![3, 4, 5]);
    }

    #[test]
    fn test_ratings_with_comments() {
        let db = Database::open_in_memory().unwrap();
        let a = db.insert_track(&track("file:///music/a.mp3")).unwrap();
        db.add_comment(a, "favstars3").unwrap();
        db.add_comment(a, "live").unwrap();
        set_rating(&db, "file:///music/a.mp3", 60);
        set_rating(&db, "file:///music/b.mp3", 80);

        let rows = db.ratings_with_comments(50, 70).unwrap();
        assert_eq!(rows.len(), 1);
        let comments = rows[0].comments.as_deref().unwrap();
        assert!(comments.contains("favstars3"));
        assert!(comments.contains("live"));
    }

    #[test]
    fn test_rating_stats() {
        let db = Database::open_in_memory().unwrap();
        db.insert_track(&track("file:///music/a.mp3")).unwrap();
        db.insert_track(&track("file:///music/b.mp3")).unwrap();
        set_rating(&db, "file:///music/a.mp3", 20);
        set_rating(&db, "file:///music/b.mp3", 90);
        let stats = db.rating_stats().unwrap();
        assert_eq!(stats.total_tracks, 2);
        assert_eq!(stats.rated_tracks, 2);
        assert_eq!(stats.by_stars, [1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_playlist_urls_in_order() {
        let db = Database::open_in_memory().unwrap();
        db.add_to_playlist(7, "file:///b.mp3", 2).unwrap();
        db.add_to_playlist(7, "file:///a.mp3", 1).unwrap();
        db.add_to_playlist(8, "file:///c.mp3", 1).unwrap();
        assert_eq!(db.playlist_urls(7).unwrap(), vec!["file:///a.mp3", "file:///b.mp3"]);
    }
}
