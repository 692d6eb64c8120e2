//! Rating-weighted dynamic playlist mixes.

pub mod catalog;
pub mod filter;
pub mod plan;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rusqlite::params_from_iter;
use serde::Serialize;
use thiserror::Error;

use crate::config::MixConfig;
use crate::db::{Database, DbError};
use crate::host::{LibraryViews, ScanGate};
use catalog::{HistoryMode, MixCatalog, MixSpec, ParamKind};
use plan::{QueryTemplateBuilder, Stage, WeightedQueryPlan};

#[derive(Error, Debug)]
pub enum MixError {
    #[error("Unknown mix: {0}")]
    UnknownMix(String),
    #[error("Mix {mix} needs parameter {param}")]
    MissingParameter { mix: String, param: String },
    #[error("Invalid value for {param}: {reason}")]
    InvalidParameter { param: String, reason: String },
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("Mix statement {index} ({stage:?}) failed: {source}")]
    Statement {
        index: usize,
        stage: Stage,
        source: rusqlite::Error,
    },
}

pub type Result<T> = std::result::Result<T, MixError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    Any,
    Unplayed,
    Played,
}

impl FromStr for PlayState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" | "all" => Ok(PlayState::Any),
            "unplayed" => Ok(PlayState::Unplayed),
            "played" => Ok(PlayState::Played),
            other => Err(format!("unknown play state {other:?}")),
        }
    }
}

/// A resolved mix parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ParamValue {
    Percentage(u8),
    Genre(i64),
    Decade(i32),
    PlayState(PlayState),
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Percentage(_) => ParamKind::Percentage,
            ParamValue::Genre(_) => ParamKind::Genre,
            ParamValue::Decade(_) => ParamKind::Decade,
            ParamValue::PlayState(_) => ParamKind::PlayState,
        }
    }

    /// Parse user input for a parameter of the given kind.
    pub fn parse(kind: ParamKind, input: &str) -> std::result::Result<Self, String> {
        let input = input.trim();
        match kind {
            ParamKind::Percentage => input
                .trim_end_matches('%')
                .parse::<u8>()
                .map(ParamValue::Percentage)
                .map_err(|e| format!("{input:?} is not a percentage: {e}")),
            ParamKind::Genre => input
                .parse::<i64>()
                .map(ParamValue::Genre)
                .map_err(|e| format!("{input:?} is not a genre id: {e}")),
            ParamKind::Decade => input
                .trim_end_matches('s')
                .parse::<i32>()
                .map(ParamValue::Decade)
                .map_err(|e| format!("{input:?} is not a decade: {e}")),
            ParamKind::PlayState => input.parse::<PlayState>().map(ParamValue::PlayState),
        }
    }
}

/// A request for one batch of mix tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct MixRequest {
    pub mix_id: String,
    pub params: BTreeMap<String, ParamValue>,
    pub limit: usize,
    /// Requesting player; drives history exclusion and library view.
    pub client: Option<String>,
}

impl MixRequest {
    pub fn new(mix_id: &str, limit: usize) -> Self {
        Self {
            mix_id: mix_id.to_string(),
            params: BTreeMap::new(),
            limit,
            client: None,
        }
    }

    pub fn with_param(mut self, id: &str, value: ParamValue) -> Self {
        self.params.insert(id.to_string(), value);
        self
    }

    pub fn for_client(mut self, client: &str) -> Self {
        self.client = Some(client.to_string());
        self
    }

    /// The value of the percentage parameter `spec` declares, if any.
    pub fn percentage(&self, spec: &MixSpec) -> Option<u8> {
        spec.params
            .iter()
            .filter(|d| d.kind == ParamKind::Percentage)
            .find_map(|d| match self.params.get(d.id) {
                Some(ParamValue::Percentage(p)) => Some(*p),
                _ => None,
            })
    }

    /// Check every parameter the mix declares is present, of the right
    /// kind and in range. Runs before any SQL is composed.
    pub fn validate(&self, spec: &MixSpec) -> Result<()> {
        for descriptor in spec.params {
            let value = self.params.get(descriptor.id).ok_or_else(|| MixError::MissingParameter {
                mix: spec.id.to_string(),
                param: descriptor.id.to_string(),
            })?;
            let invalid = |reason: String| MixError::InvalidParameter {
                param: descriptor.id.to_string(),
                reason,
            };
            if value.kind() != descriptor.kind {
                return Err(invalid(format!("expected {:?}, got {:?}", descriptor.kind, value.kind())));
            }
            match *value {
                ParamValue::Percentage(p) if p > 100 => {
                    return Err(invalid(format!("{p} is above 100")));
                }
                ParamValue::Decade(d) if d % 10 != 0 || !(1000..=2990).contains(&d) => {
                    return Err(invalid(format!("{d} is not the first year of a decade")));
                }
                ParamValue::Genre(id) if id <= 0 => {
                    return Err(invalid(format!("{id} is not a genre id")));
                }
                _ => {}
            }
        }
        if let Some(id) = self.params.keys().find(|id| spec.param(id).is_none()) {
            return Err(MixError::InvalidParameter {
                param: id.clone(),
                reason: format!("not a parameter of mix {}", spec.id),
            });
        }
        Ok(())
    }
}

/// One track of a generated mix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MixTrack {
    pub id: i64,
    pub url: String,
}

impl fmt::Display for MixTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Builds and runs mixes against the library.
pub struct MixEngine<'a> {
    config: &'a MixConfig,
    gate: &'a dyn ScanGate,
    views: &'a dyn LibraryViews,
}

impl<'a> MixEngine<'a> {
    pub fn new(config: &'a MixConfig, gate: &'a dyn ScanGate, views: &'a dyn LibraryViews) -> Self {
        Self { config, gate, views }
    }

    /// Validate a request and build its statement plan.
    pub fn plan(&self, request: &MixRequest) -> Result<WeightedQueryPlan> {
        let spec = MixCatalog::get(&request.mix_id)
            .ok_or_else(|| MixError::UnknownMix(request.mix_id.clone()))?;
        request.validate(spec)?;
        let library = request
            .client
            .as_deref()
            .and_then(|client| self.views.library_for_client(client));
        Ok(QueryTemplateBuilder::new(self.config).build(spec, request, library.as_deref()))
    }

    /// Generate up to `request.limit` tracks. Returns no tracks while the
    /// library is being scanned.
    pub fn generate(&self, db: &Database, request: &MixRequest) -> Result<Vec<MixTrack>> {
        if self.gate.is_scanning() {
            log::warn!("Library scan in progress, not generating mix {}", request.mix_id);
            return Ok(Vec::new());
        }
        let plan = self.plan(request)?;
        let tracks = execute_plan(db, &plan)?;
        log::info!("Mix {} produced {} tracks", request.mix_id, tracks.len());

        let keeps_history = MixCatalog::get(&request.mix_id)
            .is_some_and(|spec| spec.history == HistoryMode::PerClient);
        if let (true, Some(client)) = (keeps_history, request.client.as_deref()) {
            let played: Vec<(i64, String)> = tracks.iter().map(|t| (t.id, t.url.clone())).collect();
            if let Err(e) = db.record_history(client, &played, self.config.history_size) {
                log::warn!("Failed to record mix history for {client}: {e}");
            }
        }
        Ok(tracks)
    }
}

/// Run a plan's statements in order and return the rows of its select.
///
/// The first failing statement aborts the remaining non-cleanup
/// statements and is returned as the error. Cleanup statements run
/// regardless so temp tables never outlive the plan.
pub fn execute_plan(db: &Database, plan: &WeightedQueryPlan) -> Result<Vec<MixTrack>> {
    let mut tracks = Vec::new();
    let mut failure: Option<MixError> = None;

    for (index, statement) in plan.statements.iter().enumerate() {
        if failure.is_some() && statement.stage != Stage::Cleanup {
            log::debug!("Skipping mix statement {index} after earlier failure");
            continue;
        }
        let params = params_from_iter(statement.params.iter());
        let outcome = match statement.stage {
            Stage::Select => db.conn.prepare(&statement.sql).and_then(|mut stmt| {
                let rows = stmt
                    .query_map(params, |row| {
                        Ok(MixTrack {
                            id: row.get(0)?,
                            url: row.get(1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                tracks = rows;
                Ok(())
            }),
            Stage::Drop | Stage::Create | Stage::Cleanup => {
                db.conn.execute(&statement.sql, params).map(|_| ())
            }
        };
        if let Err(source) = outcome {
            log::error!("Mix statement {index} ({:?}) failed: {source}", statement.stage);
            if failure.is_none() && statement.stage != Stage::Cleanup {
                failure = Some(MixError::Statement {
                    index,
                    stage: statement.stage,
                    source,
                });
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(tracks),
    }
}
