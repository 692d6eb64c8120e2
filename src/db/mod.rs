pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Schema check failed: {0}")]
    Schema(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Handle on the media server's library database.
///
/// The server owns the schema. `open` only creates the tables this crate
/// reads or writes when they are missing, so a standalone database file
/// behaves like a server library.
pub struct Database {
    pub conn: Connection,
}

/// Columns read by queries, per table.
const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    ("tracks", &["id", "url", "urlmd5", "year", "secs", "audio", "remote", "extid"]),
    ("tracks_persistent", &["url", "urlmd5", "rating", "playcount"]),
    ("comments", &["track", "value"]),
    ("genre_track", &["genre", "track"]),
    ("library_track", &["library", "track"]),
    ("dynamicplaylist_history", &["client", "id", "url", "added"]),
];

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode so the server's readers are not blocked by rating writes
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.check_host_tables()?;
        self.ensure_host_tables()?;
        Ok(())
    }

    /// Whether the connection is in autocommit mode (no open transaction).
    pub fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    fn ensure_host_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tracks (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                url             TEXT NOT NULL UNIQUE,
                urlmd5          TEXT NOT NULL,
                title           TEXT,
                year            INTEGER,
                secs            REAL,
                audio           INTEGER NOT NULL DEFAULT 1,
                remote          INTEGER NOT NULL DEFAULT 0,
                extid           TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tracks_urlmd5 ON tracks(urlmd5);
            CREATE INDEX IF NOT EXISTS idx_tracks_year ON tracks(year);

            -- Survives library rescans; keyed by md5 of the track url
            CREATE TABLE IF NOT EXISTS tracks_persistent (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                url             TEXT NOT NULL,
                urlmd5          TEXT NOT NULL UNIQUE,
                rating          INTEGER,
                playcount       INTEGER,
                lastplayed      INTEGER,
                added           INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_persistent_rating ON tracks_persistent(rating);

            CREATE TABLE IF NOT EXISTS contributors (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS contributor_track (
                contributor     INTEGER NOT NULL,
                track           INTEGER NOT NULL,
                role            INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (contributor, track, role)
            );
            CREATE INDEX IF NOT EXISTS idx_contributor_track_track ON contributor_track(track);

            CREATE TABLE IF NOT EXISTS genres (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS genre_track (
                genre           INTEGER NOT NULL,
                track           INTEGER NOT NULL,
                PRIMARY KEY (genre, track)
            );
            CREATE INDEX IF NOT EXISTS idx_genre_track_track ON genre_track(track);

            CREATE TABLE IF NOT EXISTS comments (
                track           INTEGER NOT NULL,
                value           TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_comments_track ON comments(track);

            -- Virtual library membership
            CREATE TABLE IF NOT EXISTS library_track (
                library         TEXT NOT NULL,
                track           INTEGER NOT NULL,
                PRIMARY KEY (library, track)
            );

            -- Saved playlist contents, by track url
            CREATE TABLE IF NOT EXISTS playlist_track (
                playlist        INTEGER NOT NULL,
                track           TEXT NOT NULL,
                position        INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_playlist_track_playlist ON playlist_track(playlist);

            -- Tracks already played per client by continuous dynamic playlists
            CREATE TABLE IF NOT EXISTS dynamicplaylist_history (
                client          TEXT NOT NULL,
                id              INTEGER NOT NULL,
                url             TEXT NOT NULL,
                added           INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_dpl_history_client ON dynamicplaylist_history(client);
            ",
        )?;
        Ok(())
    }

    /// Verify the columns we depend on exist in tables that are already
    /// present, so a library with an unexpected layout fails at open
    /// instead of mid-operation.
    fn check_host_tables(&self) -> Result<()> {
        let mut stmt = self.conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
        for (table, required) in REQUIRED_COLUMNS {
            let columns: Vec<String> = stmt
                .query_map([table], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if columns.is_empty() {
                continue;
            }
            for column in *required {
                if !columns.iter().any(|c| c == column) {
                    return Err(DbError::Schema(format!("{table} has no column {column}")));
                }
            }
        }
        Ok(())
    }
}

/// Lowercase hex md5 of a track url, the server's key for persistent data.
pub fn url_md5(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

/// `LIKE` pattern matching values that contain `text` literally. Use
/// with `ESCAPE '\'`.
pub fn like_contains(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
