pub mod backup;
pub mod commands;
pub mod config;
pub mod db;
pub mod export;
pub mod host;
pub mod import;
pub mod mix;
pub mod ops;
pub mod rating;
pub mod schedule;
pub mod store;

/// Application name for XDG paths
pub const APP_NAME: &str = "ratingslight";

/// Display name written into backup and export headers
pub const DISPLAY_NAME: &str = "Ratings Light";
