//! Process-wide sampling context: named id sets plus a date range, seeded
//! once at startup and read-only afterwards.

use crate::filter::{date_value, in_ids};
use crate::objectid::ObjectId;
use chrono::NaiveDateTime;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde_json::{json, Value as Json};
use std::collections::HashMap;

/// Date range restricting sampled exports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleDateRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

/// Named filter sets used to restrict exports to sample data. Populated by a
/// user-supplied callback during startup (typically with id lists queried from
/// the database), then shared immutably.
#[derive(Default, Debug)]
pub struct SamplingContext {
    id_sets: HashMap<String, Vec<ObjectId>>,
    date_range: Option<SampleDateRange>,
}

impl SamplingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a seeding callback. The callback sees the current context and
    /// mutates it; called during single-threaded startup only.
    pub fn update_context(&mut self, f: impl FnOnce(&mut SamplingContext)) {
        f(self);
    }

    pub fn set_ids(&mut self, kind: &str, ids: Vec<ObjectId>) {
        self.id_sets.insert(kind.to_string(), ids);
    }

    pub fn set_date_range(&mut self, range: SampleDateRange) {
        self.date_range = Some(range);
    }

    /// The id set for `kind` (e.g. "task"). Empty or missing sets are a
    /// configuration error: a sampled export without ids would export nothing.
    pub fn ids(&self, kind: &str) -> Result<&[ObjectId]> {
        let ids = self
            .id_sets
            .get(kind)
            .ok_or_else(|| eyre!("Sampling context has no '{}_ids' set", kind))?;
        if ids.is_empty() {
            return Err(eyre!("Sampling context '{}_ids' set is empty", kind));
        }
        Ok(ids)
    }

    pub fn date_range(&self) -> Result<SampleDateRange> {
        self.date_range
            .ok_or_else(|| eyre!("Sampling context has no date_range"))
    }
}

/// `{<field>: {"$in": [...<kind> ids]}}` fragment for sampled queries.
pub fn sample_ids_filter(ctx: &SamplingContext, kind: &str, field: &str) -> Result<Json> {
    Ok(json!({ field: in_ids(ctx.ids(kind)?) }))
}

/// `{"date": {"$gte"/"$lte": ...}}` fragment from the sampled date range.
pub fn sample_date_range_filter(ctx: &SamplingContext) -> Result<Json> {
    let range = ctx.date_range()?;
    let mut bounds = serde_json::Map::new();
    if let Some(start) = range.start {
        bounds.insert("$gte".to_string(), date_value(start));
    }
    if let Some(end) = range.end {
        bounds.insert("$lte".to_string(), date_value(end));
    }
    if bounds.is_empty() {
        return Err(eyre!("Sampling context date_range has no bounds"));
    }
    Ok(json!({ "date": Json::Object(bounds) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn seeded() -> SamplingContext {
        let mut ctx = SamplingContext::new();
        ctx.update_context(|ctx| {
            ctx.set_ids(
                "task",
                vec![ObjectId::parse_hex("64bb7ea337b9d8195e3b441d").unwrap()],
            );
            ctx.set_date_range(SampleDateRange {
                start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0),
                end: None,
            });
        });
        ctx
    }

    #[test]
    fn ids_filter_composes() {
        let ctx = seeded();
        let filter = sample_ids_filter(&ctx, "task", "tasks").unwrap();
        assert_eq!(
            filter["tasks"]["$in"][0]["$oid"].as_str(),
            Some("64bb7ea337b9d8195e3b441d")
        );
    }

    #[test]
    fn date_range_filter_has_only_set_bounds() {
        let ctx = seeded();
        let filter = sample_date_range_filter(&ctx).unwrap();
        assert!(filter["date"].get("$gte").is_some());
        assert!(filter["date"].get("$lte").is_none());
    }

    #[test]
    fn missing_sets_are_errors() {
        let ctx = SamplingContext::new();
        assert!(ctx.ids("task").is_err());
        assert!(ctx.date_range().is_err());

        let mut empty = SamplingContext::new();
        empty.set_ids("task", vec![]);
        assert!(empty.ids("task").is_err());
    }
}
