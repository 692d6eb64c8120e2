//! Registry of the rating mixes offered to dynamic playlists.

use serde::Serialize;

/// What a mix parameter asks the user for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// 0–100 share of the "high" bucket in a weighted mix.
    Percentage,
    /// A genre id.
    Genre,
    /// First year of a decade, e.g. 1970.
    Decade,
    /// Any / unplayed / played.
    PlayState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamDescriptor {
    pub id: &'static str,
    pub kind: ParamKind,
    pub label: &'static str,
}

/// Which tracks a bucket draws from, by rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingBand {
    Unrated,
    Rated,
    /// Rated, but below the top-rated cutoff.
    RatedBelowTop,
    /// At or above the top-rated cutoff.
    TopRated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Strategy {
    /// One filtered, randomly ordered select.
    Single { band: RatingBand },
    /// Two buckets mixed by the `percentage` parameter: `percentage`
    /// percent drawn from `high`, the rest from `low`.
    Weighted { low: RatingBand, high: RatingBand },
}

/// Whether tracks already played for a client are excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    /// Continuous dynamic playlists skip the client's recent history.
    PerClient,
    /// One-shot "don't stop the music" seed mixes do not.
    Ignore,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MixSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub params: &'static [ParamDescriptor],
    pub strategy: Strategy,
    pub history: HistoryMode,
}

impl MixSpec {
    pub fn param(&self, id: &str) -> Option<&'static ParamDescriptor> {
        self.params.iter().find(|p| p.id == id)
    }

    pub fn is_weighted(&self) -> bool {
        matches!(self.strategy, Strategy::Weighted { .. })
    }
}

const PERCENT_RATED: ParamDescriptor = ParamDescriptor {
    id: "percentage",
    kind: ParamKind::Percentage,
    label: "Percentage of rated tracks",
};

const PERCENT_TOP: ParamDescriptor = ParamDescriptor {
    id: "percentage",
    kind: ParamKind::Percentage,
    label: "Percentage of top rated tracks",
};

const GENRE: ParamDescriptor = ParamDescriptor {
    id: "genre",
    kind: ParamKind::Genre,
    label: "Genre",
};

const DECADE: ParamDescriptor = ParamDescriptor {
    id: "decade",
    kind: ParamKind::Decade,
    label: "Decade",
};

const PLAY_STATE: ParamDescriptor = ParamDescriptor {
    id: "playstate",
    kind: ParamKind::PlayState,
    label: "Play state",
};

const RATED: Strategy = Strategy::Single { band: RatingBand::Rated };
const TOP_MIX: Strategy = Strategy::Weighted {
    low: RatingBand::RatedBelowTop,
    high: RatingBand::TopRated,
};
const UNRATED_MIX: Strategy = Strategy::Weighted {
    low: RatingBand::Unrated,
    high: RatingBand::Rated,
};

static MIXES: &[MixSpec] = &[
    MixSpec {
        id: "rated",
        name: "Rated tracks",
        params: &[],
        strategy: RATED,
        history: HistoryMode::PerClient,
    },
    MixSpec {
        id: "rated_genre",
        name: "Rated tracks (genre)",
        params: &[GENRE],
        strategy: RATED,
        history: HistoryMode::PerClient,
    },
    MixSpec {
        id: "rated_decade",
        name: "Rated tracks (decade)",
        params: &[DECADE],
        strategy: RATED,
        history: HistoryMode::PerClient,
    },
    MixSpec {
        id: "rated_decade_genre",
        name: "Rated tracks (decade and genre)",
        params: &[DECADE, GENRE],
        strategy: RATED,
        history: HistoryMode::PerClient,
    },
    MixSpec {
        id: "rated_playstate",
        name: "Rated tracks (play state)",
        params: &[PLAY_STATE],
        strategy: RATED,
        history: HistoryMode::PerClient,
    },
    MixSpec {
        id: "rated_toprated",
        name: "Rated tracks with a share of top rated",
        params: &[PERCENT_TOP],
        strategy: TOP_MIX,
        history: HistoryMode::PerClient,
    },
    MixSpec {
        id: "rated_toprated_genre",
        name: "Rated tracks with a share of top rated (genre)",
        params: &[PERCENT_TOP, GENRE],
        strategy: TOP_MIX,
        history: HistoryMode::PerClient,
    },
    MixSpec {
        id: "rated_toprated_decade",
        name: "Rated tracks with a share of top rated (decade)",
        params: &[PERCENT_TOP, DECADE],
        strategy: TOP_MIX,
        history: HistoryMode::PerClient,
    },
    MixSpec {
        id: "unrated_rated",
        name: "Unrated tracks with a share of rated",
        params: &[PERCENT_RATED],
        strategy: UNRATED_MIX,
        history: HistoryMode::PerClient,
    },
    MixSpec {
        id: "unrated_rated_genre",
        name: "Unrated tracks with a share of rated (genre)",
        params: &[PERCENT_RATED, GENRE],
        strategy: UNRATED_MIX,
        history: HistoryMode::PerClient,
    },
    MixSpec {
        id: "unrated_rated_decade",
        name: "Unrated tracks with a share of rated (decade)",
        params: &[PERCENT_RATED, DECADE],
        strategy: UNRATED_MIX,
        history: HistoryMode::PerClient,
    },
    MixSpec {
        id: "unrated_rated_playstate",
        name: "Unrated tracks with a share of rated (play state)",
        params: &[PERCENT_RATED, PLAY_STATE],
        strategy: UNRATED_MIX,
        history: HistoryMode::PerClient,
    },
    MixSpec {
        id: "dstm_rated",
        name: "Don't stop the music: rated tracks",
        params: &[],
        strategy: RATED,
        history: HistoryMode::Ignore,
    },
    MixSpec {
        id: "dstm_toprated",
        name: "Don't stop the music: rated with a share of top rated",
        params: &[PERCENT_TOP],
        strategy: TOP_MIX,
        history: HistoryMode::Ignore,
    },
    MixSpec {
        id: "dstm_unrated_rated",
        name: "Don't stop the music: unrated with a share of rated",
        params: &[PERCENT_RATED],
        strategy: UNRATED_MIX,
        history: HistoryMode::Ignore,
    },
];

/// Static mix registry.
pub struct MixCatalog;

impl MixCatalog {
    pub fn all() -> &'static [MixSpec] {
        MIXES
    }

    pub fn get(id: &str) -> Option<&'static MixSpec> {
        MIXES.iter().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<_> = MixCatalog::all().iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), MixCatalog::all().len());
    }

    #[test]
    fn test_weighted_mixes_take_a_percentage() {
        for mix in MixCatalog::all() {
            let has_percentage = mix.params.iter().any(|p| p.kind == ParamKind::Percentage);
            assert_eq!(mix.is_weighted(), has_percentage, "{}", mix.id);
        }
    }

    #[test]
    fn test_dstm_mixes_ignore_history() {
        for mix in MixCatalog::all() {
            let expected = if mix.id.starts_with("dstm_") {
                HistoryMode::Ignore
            } else {
                HistoryMode::PerClient
            };
            assert_eq!(mix.history, expected, "{}", mix.id);
        }
    }

    #[test]
    fn test_lookup() {
        let mix = MixCatalog::get("unrated_rated_genre").unwrap();
        assert_eq!(mix.param("genre").unwrap().kind, ParamKind::Genre);
        assert!(mix.param("decade").is_none());
        assert!(MixCatalog::get("nope").is_none());
    }
}
