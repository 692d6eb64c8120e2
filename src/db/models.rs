use serde::Serialize;

use crate::rating::Rating;

/// Data for adding a track to the library (used to seed standalone
/// databases and tests; on a server the scanner does this).
#[derive(Debug, Clone, Default)]
pub struct NewTrack {
    pub url: String,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub secs: Option<f64>,
    pub remote: bool,
    pub extid: Option<String>,
    pub playcount: Option<i64>,
}

/// A catalog entry, as much of it as rating code needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTrack {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub remote: bool,
    pub extid: Option<String>,
}

impl CatalogTrack {
    /// Remote tracks can only be restored when they carry an online id.
    pub fn is_restorable(&self) -> bool {
        !self.remote || self.extid.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// A row of the persistent table with a positive rating.
#[derive(Debug, Clone, PartialEq)]
pub struct RatedRow {
    pub url: String,
    pub urlmd5: String,
    pub rating: i64,
}

/// A rated catalog track, as listed in menus and command results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatedTrack {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub rating: Rating,
}

/// A rated track with the concatenated text of its comment tags.
#[derive(Debug, Clone)]
pub struct CommentedRating {
    pub url: String,
    pub rating: i64,
    pub comments: Option<String>,
}

/// Number of rated tracks per whole-star bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RatingStats {
    pub total_tracks: i64,
    pub rated_tracks: i64,
    /// Index 0 is 1 star, index 4 is 5 stars.
    pub by_stars: [i64; 5],
}
