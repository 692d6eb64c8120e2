//! QueryTemplateBuilder: turns a mix request into an ordered statement plan.

use rusqlite::types::Value;

use super::catalog::{HistoryMode, MixSpec, RatingBand, Strategy};
use super::filter::{render_where, Filter};
use super::{MixRequest, ParamValue};
use crate::config::MixConfig;
use crate::db::like_contains;

pub const LOW_TABLE: &str = "rl_mix_low";
pub const HIGH_TABLE: &str = "rl_mix_high";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Drop a temp table left over from an earlier run.
    Drop,
    /// Materialize one bucket into a temp table.
    Create,
    /// The select whose rows are the mix.
    Select,
    /// Drop temp tables; always runs.
    Cleanup,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanStatement {
    pub stage: Stage,
    pub sql: String,
    pub params: Vec<Value>,
}

/// Statements that, run in order, yield the mix as `(id, url)` rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightedQueryPlan {
    pub statements: Vec<PlanStatement>,
}

impl WeightedQueryPlan {
    fn push(&mut self, stage: Stage, sql: String, params: Vec<Value>) {
        self.statements.push(PlanStatement { stage, sql, params });
    }

    pub fn select(&self) -> Option<&PlanStatement> {
        self.statements.iter().find(|s| s.stage == Stage::Select)
    }
}

/// Split `limit` rows between the low and high buckets, `percentage`
/// percent (rounded) going to the high bucket. With a limit of 100 this
/// is exactly `(100 - percentage, percentage)`.
pub fn bucket_limits(limit: usize, percentage: u8) -> (usize, usize) {
    let percentage = u128::from(percentage.min(100));
    // Never exceeds `limit`, so it fits back into usize
    let high = ((limit as u128 * percentage + 50) / 100) as usize;
    (limit - high, high)
}

/// Bound `LIMIT` value. SQLite reads a negative limit as "no limit", so
/// oversized values saturate instead of wrapping.
fn limit_value(limit: usize) -> Value {
    Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX))
}

pub struct QueryTemplateBuilder<'a> {
    config: &'a MixConfig,
}

impl<'a> QueryTemplateBuilder<'a> {
    pub fn new(config: &'a MixConfig) -> Self {
        Self { config }
    }

    /// Build the plan for a validated request. `library` is the client's
    /// selected virtual library, if any.
    pub fn build(&self, spec: &MixSpec, request: &MixRequest, library: Option<&str>) -> WeightedQueryPlan {
        let shared = self.shared_filters(spec, request, library);
        let mut plan = WeightedQueryPlan::default();

        match spec.strategy {
            Strategy::Single { band } => {
                let mut params = Vec::new();
                let sql = self.bucket_select(&shared, band, request.limit, &mut params);
                plan.push(Stage::Select, sql, params);
            }
            Strategy::Weighted { low, high } => {
                let percentage = request.percentage(spec).unwrap_or(0);
                let (low_limit, high_limit) = bucket_limits(request.limit, percentage);

                for (table, band, limit) in [(LOW_TABLE, low, low_limit), (HIGH_TABLE, high, high_limit)] {
                    plan.push(Stage::Drop, drop_sql(table), Vec::new());
                    let mut params = Vec::new();
                    let select = self.bucket_select(&shared, band, limit, &mut params);
                    plan.push(Stage::Create, format!("CREATE TEMP TABLE {table} AS\n{select}"), params);
                }

                plan.push(
                    Stage::Select,
                    format!(
                        "SELECT id, url FROM (\n\
                         SELECT id, url FROM temp.{LOW_TABLE}\n\
                         UNION\n\
                         SELECT id, url FROM temp.{HIGH_TABLE}\n\
                         )\n\
                         ORDER BY random()\n\
                         LIMIT ?"
                    ),
                    vec![limit_value(request.limit)],
                );
                plan.push(Stage::Cleanup, drop_sql(LOW_TABLE), Vec::new());
                plan.push(Stage::Cleanup, drop_sql(HIGH_TABLE), Vec::new());
            }
        }
        plan
    }

    /// Predicates every variant applies, in a fixed order.
    fn shared_filters(&self, spec: &MixSpec, request: &MixRequest, library: Option<&str>) -> Vec<Filter> {
        let mut filters = vec![Filter::Audio];

        let keyword = self.config.never_keyword.trim();
        if !keyword.is_empty() {
            filters.push(Filter::NeverTag(like_contains(keyword)));
        }
        filters.push(Filter::MinDuration(self.config.min_track_secs));
        if !self.config.excluded_genres.is_empty() {
            filters.push(Filter::ExcludedGenres(self.config.excluded_genres.clone()));
        }
        if spec.history == HistoryMode::PerClient {
            if let Some(client) = &request.client {
                filters.push(Filter::ClientHistory(client.clone()));
            }
        }
        if let Some(library) = library {
            filters.push(Filter::LibraryScope(library.to_string()));
        }

        for descriptor in spec.params {
            match request.params.get(descriptor.id) {
                Some(ParamValue::Genre(id)) => filters.push(Filter::Genre(*id)),
                Some(ParamValue::Decade(start)) => filters.push(Filter::Decade(*start)),
                Some(ParamValue::PlayState(state)) => filters.push(Filter::PlayState(*state)),
                // Percentages shape bucket limits, not predicates
                Some(ParamValue::Percentage(_)) | None => {}
            }
        }
        filters
    }

    fn bucket_select(&self, shared: &[Filter], band: RatingBand, limit: usize, params: &mut Vec<Value>) -> String {
        let mut filters = shared.to_vec();
        filters.push(Filter::Rating {
            band,
            top_rated_min: self.config.top_rated_min,
        });
        let predicate = render_where(&filters, params);
        params.push(limit_value(limit));
        format!(
            "SELECT tracks.id AS id, tracks.url AS url\n\
             FROM tracks\n\
             LEFT JOIN tracks_persistent ON tracks_persistent.urlmd5 = tracks.urlmd5\n\
             WHERE {predicate}\n\
             ORDER BY random()\n\
             LIMIT ?"
        )
    }
}

fn drop_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS temp.{table}")
}
