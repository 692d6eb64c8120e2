use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Library root directories. Backups store track paths relative to these
    /// so a restore survives moving the library to a new root.
    pub media_dirs: Vec<PathBuf>,
    /// Offer half-star steps in rating menus and comment-tag import.
    pub half_stars: bool,
    pub backup: BackupConfig,
    pub mix: MixConfig,
    pub import: ImportConfig,
    pub export: ExportConfig,
}

/// Backup, retention and restore settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory backup files are written to (defaults to the XDG data dir).
    pub dir: Option<PathBuf>,
    /// Run a backup once a day at `time`.
    pub scheduled: bool,
    /// Local time of day for scheduled backups, `HH:MM`.
    pub time: String,
    /// Backups older than this many days may be deleted.
    pub retention_days: u32,
    /// Never delete below this many backup files.
    pub min_keep: usize,
    /// Clear all ratings before restoring.
    pub clear_before_restore: bool,
    /// Complete `<track>` elements parsed per restore tick.
    pub restore_batch_size: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: None,
            scheduled: false,
            time: "03:30".to_string(),
            retention_days: 30,
            min_keep: 5,
            clear_before_restore: true,
            restore_batch_size: 50,
        }
    }
}

/// Weighted-mix settings shared by every mix.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    /// Tracks returned per mix request.
    pub limit: usize,
    /// Tracks shorter than this are never mixed in.
    pub min_track_secs: u32,
    /// Genre names excluded from every mix.
    pub excluded_genres: Vec<String>,
    /// Tracks whose comment contains this keyword are never mixed in.
    pub never_keyword: String,
    /// Ratings at or above this value count as "top rated".
    pub top_rated_min: u8,
    /// Rolling per-client history length for continuous mixes.
    pub history_size: usize,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            min_track_secs: 90,
            excluded_genres: Vec::new(),
            never_keyword: "never".to_string(),
            top_rated_min: 80,
            history_size: 200,
        }
    }
}

/// Comment-tag keyword import. A track rated 4 stars carries
/// `keyword_prefix + "4" + keyword_suffix` in its comment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub keyword_prefix: String,
    pub keyword_suffix: String,
    pub clear_before_import: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            keyword_prefix: "favstars".to_string(),
            keyword_suffix: String::new(),
            clear_before_import: false,
        }
    }
}

/// Playlist export settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory playlist files are written to (defaults to the backup dir).
    pub dir: Option<PathBuf>,
    /// Only export ratings that disagree with the track's comment tag.
    pub only_mismatched: bool,
}

impl AppConfig {
    /// Load config from `~/.config/ratingslight/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }),
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Parse a TOML document into a config.
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        let config = toml::from_str::<AppConfig>(contents)?;
        log::info!("Loaded config");
        Ok(config)
    }

    /// Backup directory: configured, else XDG data dir.
    pub fn backup_dir(&self) -> PathBuf {
        self.backup.dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Export directory: configured, else the backup directory.
    pub fn export_dir(&self) -> PathBuf {
        self.export.dir.clone().unwrap_or_else(|| self.backup_dir())
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.to_path_buf()
    } else {
        PathBuf::from(".")
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    default_data_dir().join("library.db")
}
