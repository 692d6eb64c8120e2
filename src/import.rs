//! Import ratings from keywords in comment tags, e.g. `favstars4`.

use serde::Serialize;

use crate::config::AppConfig;
use crate::db;
use crate::ops::OperationKind;
use crate::rating::Rating;
use crate::store::RatingStore;

/// The `prefix + stars + suffix` keyword convention.
#[derive(Debug, Clone)]
pub struct KeywordPattern {
    prefix: String,
    suffix: String,
    half_stars: bool,
}

impl KeywordPattern {
    pub fn new(prefix: &str, suffix: &str, half_stars: bool) -> Self {
        Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            half_stars,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.import.keyword_prefix,
            &config.import.keyword_suffix,
            config.half_stars,
        )
    }

    pub fn keyword(&self, stars: f64) -> String {
        format!("{}{stars}{}", self.prefix, self.suffix)
    }

    /// Star values with their keywords. Whole stars come first so a
    /// half-star keyword (which contains the whole-star one) is applied last.
    pub fn keywords(&self) -> Vec<(f64, String)> {
        let mut values: Vec<f64> = (1..=5).map(f64::from).collect();
        if self.half_stars {
            values.extend((0..5).map(|n| f64::from(n) + 0.5));
        }
        values.into_iter().map(|v| (v, self.keyword(v))).collect()
    }

    /// Rating a comment encodes: the keyword an import would apply last.
    pub fn rating_in(&self, comment: &str) -> Option<Rating> {
        self.keywords()
            .into_iter()
            .filter(|(_, keyword)| comment.contains(keyword.as_str()))
            .last()
            .map(|(stars, _)| Rating::from_stars(stars))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    /// Ratings written.
    pub imported: usize,
    /// Whether existing ratings were cleared first.
    pub cleared: bool,
}

/// Rate every track whose comment carries a rating keyword.
/// `Ok(None)` if an import is already running.
pub fn import_from_comments(store: &RatingStore, config: &AppConfig) -> db::Result<Option<ImportReport>> {
    let Some(_guard) = store.coordinator().try_begin(OperationKind::Import) else {
        return Ok(None);
    };
    if store.is_scanning() {
        log::warn!("Library scan in progress, not importing ratings");
        return Ok(Some(ImportReport::default()));
    }

    let mut report = ImportReport::default();
    if config.import.clear_before_import {
        report.cleared = store.clear_all_unguarded();
    }

    let pattern = KeywordPattern::from_config(config);
    for (stars, keyword) in pattern.keywords() {
        let urls = store.db().urls_with_comment_like(&db::like_contains(&keyword))?;
        if urls.is_empty() {
            continue;
        }
        let rating = Rating::from_stars(stars);
        let written = urls
            .iter()
            .filter(|url| store.write(url, i64::from(rating)))
            .count();
        log::debug!("{keyword}: rated {written} tracks {rating}");
        report.imported += written;
    }
    log::info!("Imported {} ratings from comment tags", report.imported);
    Ok(Some(report))
}
