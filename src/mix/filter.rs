//! Named predicate fragments shared by every mix.
//!
//! Each filter renders one SQL boolean expression over `tracks` and
//! `tracks_persistent` with `?` placeholders, pushing its bound values in
//! placeholder order. Nothing user-supplied is spliced into SQL text.

use rusqlite::types::Value;

use super::catalog::RatingBand;
use super::PlayState;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Audio tracks only (no playlists, no artwork entries).
    Audio,
    /// No comment tag matching this LIKE pattern ("never play"),
    /// `\` escaped.
    NeverTag(String),
    /// At least this many seconds long.
    MinDuration(u32),
    /// None of these genre names.
    ExcludedGenres(Vec<String>),
    /// Not in this client's dynamic playlist history.
    ClientHistory(String),
    /// Member of this virtual library.
    LibraryScope(String),
    /// Tagged with this genre id.
    Genre(i64),
    /// Released in `[decade, decade + 10)`.
    Decade(i32),
    PlayState(PlayState),
    Rating { band: RatingBand, top_rated_min: u8 },
}

impl Filter {
    pub fn render(&self, sql: &mut String, params: &mut Vec<Value>) {
        match self {
            Filter::Audio => sql.push_str("tracks.audio = 1"),
            Filter::NeverTag(pattern) => {
                sql.push_str(
                    "NOT EXISTS (SELECT 1 FROM comments \
                     WHERE comments.track = tracks.id AND comments.value LIKE ? ESCAPE '\\')",
                );
                params.push(Value::Text(pattern.clone()));
            }
            Filter::MinDuration(secs) => {
                sql.push_str("IFNULL(tracks.secs, 0) >= ?");
                params.push(Value::Integer(*secs as i64));
            }
            Filter::ExcludedGenres(names) => {
                if names.is_empty() {
                    sql.push_str("1 = 1");
                    return;
                }
                let placeholders = vec!["?"; names.len()].join(", ");
                sql.push_str(&format!(
                    "NOT EXISTS (SELECT 1 FROM genre_track \
                     JOIN genres ON genres.id = genre_track.genre \
                     WHERE genre_track.track = tracks.id AND genres.name IN ({placeholders}))"
                ));
                params.extend(names.iter().map(|n| Value::Text(n.clone())));
            }
            Filter::ClientHistory(client) => {
                sql.push_str(
                    "NOT EXISTS (SELECT 1 FROM dynamicplaylist_history \
                     WHERE dynamicplaylist_history.client = ? \
                     AND dynamicplaylist_history.id = tracks.id)",
                );
                params.push(Value::Text(client.clone()));
            }
            Filter::LibraryScope(library) => {
                sql.push_str(
                    "EXISTS (SELECT 1 FROM library_track \
                     WHERE library_track.track = tracks.id AND library_track.library = ?)",
                );
                params.push(Value::Text(library.clone()));
            }
            Filter::Genre(genre_id) => {
                sql.push_str(
                    "EXISTS (SELECT 1 FROM genre_track \
                     WHERE genre_track.track = tracks.id AND genre_track.genre = ?)",
                );
                params.push(Value::Integer(*genre_id));
            }
            Filter::Decade(start) => {
                sql.push_str("tracks.year >= ? AND tracks.year < ?");
                params.push(Value::Integer(*start as i64));
                params.push(Value::Integer(*start as i64 + 10));
            }
            Filter::PlayState(state) => match state {
                PlayState::Any => sql.push_str("1 = 1"),
                PlayState::Unplayed => sql.push_str(
                    "(tracks_persistent.playcount IS NULL OR tracks_persistent.playcount = 0)",
                ),
                PlayState::Played => sql.push_str("tracks_persistent.playcount > 0"),
            },
            Filter::Rating { band, top_rated_min } => match band {
                RatingBand::Unrated => sql.push_str(
                    "(tracks_persistent.rating IS NULL OR tracks_persistent.rating = 0)",
                ),
                RatingBand::Rated => sql.push_str("tracks_persistent.rating > 0"),
                RatingBand::RatedBelowTop => {
                    sql.push_str("tracks_persistent.rating > 0 AND tracks_persistent.rating < ?");
                    params.push(Value::Integer(*top_rated_min as i64));
                }
                RatingBand::TopRated => {
                    sql.push_str("tracks_persistent.rating >= ?");
                    params.push(Value::Integer(*top_rated_min as i64));
                }
            },
        }
    }
}

/// Render filters as a `WHERE` clause body joined by `AND`. Each filter
/// is parenthesised so fragments with their own `AND`/`OR` compose safely.
pub fn render_where(filters: &[Filter], params: &mut Vec<Value>) -> String {
    if filters.is_empty() {
        return "1 = 1".to_string();
    }
    let mut sql = String::new();
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            sql.push_str("\n  AND ");
        }
        sql.push('(');
        filter.render(&mut sql, params);
        sql.push(')');
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(filter: Filter) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        filter.render(&mut sql, &mut params);
        (sql, params)
    }

    fn placeholders(sql: &str) -> usize {
        sql.matches('?').count()
    }

    #[test]
    fn test_placeholders_match_params() {
        let filters = vec![
            Filter::Audio,
            Filter::NeverTag("%never%".into()),
            Filter::MinDuration(90),
            Filter::ExcludedGenres(vec!["Christmas".into(), "Spoken Word".into()]),
            Filter::ClientHistory("00:04:20:aa:bb:cc".into()),
            Filter::LibraryScope("lib1".into()),
            Filter::Genre(3),
            Filter::Decade(1970),
            Filter::PlayState(PlayState::Unplayed),
            Filter::Rating { band: RatingBand::TopRated, top_rated_min: 80 },
            Filter::Rating { band: RatingBand::RatedBelowTop, top_rated_min: 80 },
        ];
        for f in filters {
            let (sql, params) = render(f.clone());
            assert_eq!(placeholders(&sql), params.len(), "{f:?}: {sql}");
        }
    }

    #[test]
    fn test_decade_is_half_open() {
        let (sql, params) = render(Filter::Decade(1980));
        assert_eq!(sql, "tracks.year >= ? AND tracks.year < ?");
        assert_eq!(params, vec![Value::Integer(1980), Value::Integer(1990)]);
    }

    #[test]
    fn test_values_are_bound_not_spliced() {
        let (sql, params) = render(Filter::ExcludedGenres(vec!["Rock'n'Roll".into()]));
        assert!(!sql.contains("Rock"));
        assert_eq!(params, vec![Value::Text("Rock'n'Roll".into())]);

        let (sql, _) = render(Filter::LibraryScope("x' OR 1=1 --".into()));
        assert!(!sql.contains("OR 1=1"));
    }

    #[test]
    fn test_empty_genre_exclusion_is_valid() {
        let (sql, params) = render(Filter::ExcludedGenres(Vec::new()));
        assert_eq!(sql, "1 = 1");
        assert!(params.is_empty());
    }

    #[test]
    fn test_render_where_wraps_each_fragment() {
        let mut params = Vec::new();
        let sql = render_where(&[Filter::Audio, Filter::Decade(1990)], &mut params);
        assert_eq!(sql, "(tracks.audio = 1)\n  AND (tracks.year >= ? AND tracks.year < ?)");
        assert_eq!(params.len(), 2);
        assert_eq!(render_where(&[], &mut params), "1 = 1");
    }
}
