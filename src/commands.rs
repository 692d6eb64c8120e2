//! Commands the host's control layer sends, and the structured results
//! it renders as menus.

use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::db::models::{CatalogTrack, RatedTrack};
use crate::rating::{Rating, STAR};
use crate::store::RatingStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command needs a client")]
    NeedsClient,
    #[error("Bad params: {0}")]
    BadParams(String),
    #[error("Bad dispatch: {0}")]
    BadDispatch(String),
}

pub type Result<T> = std::result::Result<T, CommandError>;

/// Stars (0–5) or points (0–100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    Stars,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RatingInput {
    Absolute { scale: Scale, value: f64 },
    Increment { scale: Scale, delta: f64 },
}

impl RatingInput {
    /// The rating after applying this input to `current`.
    pub fn apply(self, current: Rating) -> Rating {
        let points = |scale: Scale, v: f64| match scale {
            Scale::Stars => v * f64::from(STAR),
            Scale::Percent => v,
        };
        match self {
            RatingInput::Absolute { scale, value } => Rating::clamped(points(scale, value).round() as i64),
            RatingInput::Increment { scale, delta } => {
                Rating::clamped(i64::from(current) + points(scale, delta).round() as i64)
            }
        }
    }

    pub fn is_increment(&self) -> bool {
        matches!(self, RatingInput::Increment { .. })
    }
}

/// `"3"`, `"3.5"` are stars; `"80"` or `"40%"` are points; a leading
/// sign makes it an increment (`"+1"`, `"-0.5"`, `"+10%"`).
impl FromStr for RatingInput {
    type Err = CommandError;

    fn from_str(input: &str) -> Result<Self> {
        let text = input.trim();
        let bad = || CommandError::BadParams(format!("invalid rating {input:?}"));
        let (text, forced_percent) = match text.strip_suffix('%') {
            Some(rest) => (rest.trim_end(), true),
            None => (text, false),
        };
        let increment = text.starts_with('+') || text.starts_with('-');
        let value: f64 = text.parse().map_err(|_| bad())?;
        if !value.is_finite() {
            return Err(bad());
        }
        let scale = if forced_percent || value.abs() > 5.0 {
            Scale::Percent
        } else {
            Scale::Stars
        };
        if value.abs() > 100.0 {
            return Err(bad());
        }
        Ok(if increment {
            RatingInput::Increment { scale, delta: value }
        } else {
            RatingInput::Absolute { scale, value }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetRating { track_id: i64, input: RatingInput },
    RatingMenu { track_id: i64 },
    MoreRatedByArtist { track_id: i64, limit: usize },
    ActionsMenu { track_id: i64 },
    RatePlaylist { playlist_id: i64, input: RatingInput },
}

/// Who is asking. Menus are rendered for a player client.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub client: Option<String>,
}

impl CommandContext {
    pub fn for_client(client: &str) -> Self {
        Self {
            client: Some(client.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MenuItem {
    /// Set the track to this rating.
    Rate {
        label: String,
        rating: Rating,
        current: bool,
    },
    /// Run another command on the track.
    Action {
        id: String,
        label: String,
        track_id: i64,
    },
    Track {
        id: i64,
        label: String,
        rating: Rating,
    },
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum CommandResult {
    Rated { track_id: i64, rating: Rating },
    PlaylistRated { playlist_id: i64, written: usize, rating: Rating },
    Menu { items: Vec<MenuItem> },
    Tracks { tracks: Vec<RatedTrack> },
}

pub struct Commands<'a> {
    store: &'a RatingStore,
    half_stars: bool,
}

impl<'a> Commands<'a> {
    pub fn new(store: &'a RatingStore, half_stars: bool) -> Self {
        Self { store, half_stars }
    }

    pub fn execute(&self, ctx: &CommandContext, command: &Command) -> Result<CommandResult> {
        log::debug!("Command {command:?} from {:?}", ctx.client);
        if self.store.is_scanning() {
            log::warn!("Library scan in progress, rejecting {command:?}");
            return Err(CommandError::BadDispatch("library scan in progress".into()));
        }
        match *command {
            Command::SetRating { track_id, input } => self.set_rating(track_id, input),
            Command::RatingMenu { track_id } => {
                require_client(ctx)?;
                self.rating_menu(track_id)
            }
            Command::MoreRatedByArtist { track_id, limit } => {
                require_client(ctx)?;
                self.more_by_artist(track_id, limit)
            }
            Command::ActionsMenu { track_id } => {
                require_client(ctx)?;
                self.actions_menu(track_id)
            }
            Command::RatePlaylist { playlist_id, input } => self.rate_playlist(playlist_id, input),
        }
    }

    fn track(&self, track_id: i64) -> Result<CatalogTrack> {
        match self.store.db().catalog_by_id(track_id) {
            Ok(Some(track)) => Ok(track),
            Ok(None) => Err(CommandError::BadDispatch(format!("no track {track_id}"))),
            Err(e) => {
                log::error!("Track lookup failed for {track_id}: {e}");
                Err(CommandError::BadDispatch(format!("no track {track_id}")))
            }
        }
    }

    fn set_rating(&self, track_id: i64, input: RatingInput) -> Result<CommandResult> {
        let track = self.track(track_id)?;
        let rating = input.apply(self.store.read(&track.url));
        if !self.store.write(&track.url, i64::from(rating)) {
            return Err(CommandError::BadDispatch(format!("rating of track {track_id} not saved")));
        }
        Ok(CommandResult::Rated { track_id, rating })
    }

    /// One entry per selectable rating, highest first, then "clear".
    fn rating_menu(&self, track_id: i64) -> Result<CommandResult> {
        let track = self.track(track_id)?;
        let current = self.store.read(&track.url);
        let step = if self.half_stars { STAR / 2 } else { STAR };
        let mut items: Vec<MenuItem> = (1..=100 / step)
            .rev()
            .map(|n| {
                let rating = Rating::clamped(i64::from(n * step));
                MenuItem::Rate {
                    label: rating.to_star_text(self.half_stars),
                    rating,
                    current: rating == current,
                }
            })
            .collect();
        items.push(MenuItem::Rate {
            label: "Clear rating".into(),
            rating: Rating::UNRATED,
            current: !current.is_rated(),
        });
        Ok(CommandResult::Menu { items })
    }

    fn more_by_artist(&self, track_id: i64, limit: usize) -> Result<CommandResult> {
        if limit == 0 {
            return Err(CommandError::BadParams("limit must be positive".into()));
        }
        self.track(track_id)?;
        match self.store.db().rated_by_same_artist(track_id, limit) {
            Ok(tracks) => Ok(CommandResult::Tracks { tracks }),
            Err(e) => {
                log::error!("Failed to list tracks by the artist of {track_id}: {e}");
                Err(CommandError::BadDispatch("artist lookup failed".into()))
            }
        }
    }

    fn actions_menu(&self, track_id: i64) -> Result<CommandResult> {
        let track = self.track(track_id)?;
        let current = self.store.read(&track.url);
        let title = track.title.as_deref().unwrap_or(&track.url);
        let mut items = vec![MenuItem::Text {
            text: format!("{title}: {}", current.to_star_text(self.half_stars)),
        }];
        let action = |id: &str, label: &str| MenuItem::Action {
            id: id.to_string(),
            label: label.to_string(),
            track_id,
        };
        items.push(action("rating_menu", "Rate this track"));
        if current.is_rated() {
            items.push(action("clear_rating", "Clear rating"));
        }
        items.push(action("more_by_artist", "More rated tracks by this artist"));

        // Preview of the artist's best tracks
        if let Ok(more) = self.store.db().rated_by_same_artist(track_id, 3) {
            items.extend(more.into_iter().map(|t| MenuItem::Track {
                label: format!(
                    "{} {}",
                    t.rating.to_star_text(self.half_stars),
                    t.title.as_deref().unwrap_or(&t.url)
                ),
                id: t.id,
                rating: t.rating,
            }));
        }
        Ok(CommandResult::Menu { items })
    }

    fn rate_playlist(&self, playlist_id: i64, input: RatingInput) -> Result<CommandResult> {
        if input.is_increment() {
            return Err(CommandError::BadParams("playlists take an absolute rating".into()));
        }
        let urls = self.store.db().playlist_urls(playlist_id).map_err(|e| {
            log::error!("Failed to read playlist {playlist_id}: {e}");
            CommandError::BadDispatch(format!("no playlist {playlist_id}"))
        })?;
        if urls.is_empty() {
            return Err(CommandError::BadDispatch(format!("playlist {playlist_id} is empty")));
        }
        let rating = input.apply(Rating::UNRATED);
        let written = self
            .store
            .rate_urls(&urls, i64::from(rating))
            .ok_or_else(|| CommandError::BadDispatch("a playlist is already being rated".into()))?;
        Ok(CommandResult::PlaylistRated {
            playlist_id,
            written,
            rating,
        })
    }
}

fn require_client(ctx: &CommandContext) -> Result<()> {
    match ctx.client.as_deref() {
        Some(client) if !client.is_empty() => Ok(()),
        _ => Err(CommandError::NeedsClient),
    }
}
