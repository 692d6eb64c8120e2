//! Rating backups: a small line-oriented XML file of `<track>` records.
//!
//! Url text is percent-encoded rather than entity-escaped, so a record
//! never contains markup characters and each one fits on a single line.

pub mod reader;
pub mod retention;
pub mod writer;

use std::collections::HashMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;

pub use reader::{restore_file, CompletionHook, RestoreCursor, RestoreOptions, RestorePhase, RestoreStats};
pub use retention::RetentionPolicy;
pub use writer::{write_backup, BackupReport};

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Database error: {0}")]
    Db(#[from] crate::db::DbError),
    #[error("Malformed backup: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Malformed backup: {0}")]
    Malformed(String),
    #[error("Backup {} ends before </{ROOT_ELEMENT}>", .0.display())]
    Truncated(PathBuf),
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// Root element of a backup document.
pub const ROOT_ELEMENT: &str = "RatingsLight";

pub const FILE_PREFIX: &str = "RL_Backup_";
pub const FILE_EXTENSION: &str = "xml";

/// `RL_Backup_YYYYMMDD-HHMM.xml`
pub fn backup_file_name(now: &DateTime<Local>) -> String {
    format!("{FILE_PREFIX}{}.{FILE_EXTENSION}", now.format("%Y%m%d-%H%M"))
}

/// Whether a file name follows the backup naming pattern.
pub fn is_backup_file_name(name: &str) -> bool {
    let Some(stamp) = name
        .strip_prefix(FILE_PREFIX)
        .and_then(|rest| rest.strip_suffix(".xml"))
    else {
        return false;
    };
    let bytes = stamp.as_bytes();
    bytes.len() == 13
        && bytes[8] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 8 || b.is_ascii_digit())
}

/// One `<track>` record of a backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRatingRecord {
    pub url: String,
    pub rating: i64,
    /// Path relative to a library root, for local files under one.
    pub relurl: Option<String>,
    pub remote: bool,
}

impl TrackRatingRecord {
    /// Render as a single `<track>` line with percent-encoded urls.
    pub fn to_xml_line(&self) -> String {
        let mut line = String::with_capacity(self.url.len() * 2 + 64);
        let _ = write!(
            line,
            "\t<track><url>{}</url><rating>{}</rating><remote>{}</remote>",
            urlencoding::encode(&self.url),
            self.rating,
            u8::from(self.remote),
        );
        if let Some(rel) = &self.relurl {
            let _ = write!(line, "<relurl>{}</relurl>", urlencoding::encode(rel));
        }
        line.push_str("</track>\n");
        line
    }

    /// Build a record from the child element texts collected for one
    /// `<track>`, decoding percent-encoded fields.
    pub fn from_fields(fields: &HashMap<String, String>) -> std::result::Result<Self, String> {
        let raw_url = fields.get("url").ok_or("record has no url")?;
        let url = urlencoding::decode(raw_url.trim())
            .map_err(|e| format!("bad url encoding: {e}"))?
            .into_owned();
        if url.is_empty() {
            return Err("record has an empty url".to_string());
        }
        let raw_rating = fields.get("rating").ok_or("record has no rating")?;
        let rating = raw_rating
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("bad rating {raw_rating:?}: {e}"))?;
        let relurl = match fields.get("relurl").map(|r| r.trim()) {
            Some(rel) if !rel.is_empty() => Some(
                urlencoding::decode(rel)
                    .map_err(|e| format!("bad relurl encoding: {e}"))?
                    .into_owned(),
            ),
            _ => None,
        };
        let remote = fields.get("remote").is_some_and(|r| r.trim() == "1");
        Ok(Self {
            url,
            rating,
            relurl,
            remote,
        })
    }
}

/// Path of a local `file://` url relative to the first library root
/// containing it, with `/` separators.
pub fn relative_path(url: &str, media_dirs: &[PathBuf]) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    if parsed.scheme() != "file" {
        return None;
    }
    let path = parsed.to_file_path().ok()?;
    media_dirs.iter().find_map(|root| {
        let rel = path.strip_prefix(root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    })
}

/// Candidate `file://` urls for a relative path under each library root.
pub fn candidate_urls(relurl: &str, media_dirs: &[PathBuf]) -> Vec<String> {
    media_dirs
        .iter()
        .filter_map(|root| {
            let path = relurl
                .split('/')
                .filter(|p| !p.is_empty())
                .fold(root.clone(), |acc, part| acc.join(part));
            url::Url::from_file_path(&path).ok().map(String::from)
        })
        .collect()
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_name() {
        let now = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).unwrap();
        let name = backup_file_name(&now);
        assert_eq!(name, "RL_Backup_20240307-0905.xml");
        assert!(is_backup_file_name(&name));
    }

    #[test]
    fn test_is_backup_file_name_rejects_others() {
        assert!(!is_backup_file_name("RL_Backup_2024030-0905.xml"));
        assert!(!is_backup_file_name("RL_Backup_20240307-0905.txt"));
        assert!(!is_backup_file_name("notes.xml"));
        assert!(!is_backup_file_name("RL_Backup_20240307X0905.xml"));
    }

    #[test]
    fn test_record_line_is_percent_encoded() {
        let record = TrackRatingRecord {
            url: "file:///music/AC&DC/<Live> 01.flac".into(),
            rating: 80,
            relurl: Some("AC&DC/<Live> 01.flac".into()),
            remote: false,
        };
        let line = record.to_xml_line();
        assert!(line.starts_with("\t<track><url>file%3A%2F%2F%2Fmusic%2FAC%26DC"));
        assert!(!line.contains('&'));
        assert!(line.contains("<rating>80</rating><remote>0</remote>"));
        assert!(line.ends_with("</track>\n"));
    }

    #[test]
    fn test_record_from_fields() {
        let mut fields = HashMap::new();
        fields.insert("url".to_string(), "file%3A%2F%2F%2Fa%20b.mp3".to_string());
        fields.insert("rating".to_string(), " 60 ".to_string());
        fields.insert("remote".to_string(), "0".to_string());
        let record = TrackRatingRecord::from_fields(&fields).unwrap();
        assert_eq!(record.url, "file:///a b.mp3");
        assert_eq!(record.rating, 60);
        assert_eq!(record.relurl, None);
        assert!(!record.remote);

        fields.remove("rating");
        assert!(TrackRatingRecord::from_fields(&fields).is_err());
    }

    #[test]
    fn test_relative_path_round_trip() {
        let roots = vec![PathBuf::from("/srv/music")];
        let rel = relative_path("file:///srv/music/Dead/1977/d1t01.flac", &roots).unwrap();
        assert_eq!(rel, "Dead/1977/d1t01.flac");
        assert!(relative_path("file:///elsewhere/x.flac", &roots).is_none());
        assert!(relative_path("spotify:track:123", &roots).is_none());

        let moved = vec![PathBuf::from("/mnt/new")];
        assert_eq!(
            candidate_urls(&rel, &moved),
            vec!["file:///mnt/new/Dead/1977/d1t01.flac".to_string()]
        );
    }
}
