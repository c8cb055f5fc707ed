//! Mongo-style filter documents.
//!
//! Filters, projections and pipelines are `serde_json::Value` objects in
//! extended-JSON shape: datetimes as `{"$date": <ms>}` and identifiers as
//! `{"$oid": "<hex>"}`. The driver boundary interprets them; this module only
//! builds and rearranges them.

use crate::objectid::ObjectId;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Map, Value as Json};

/// Wrap a timestamp as an extended-JSON date.
pub fn date_value(dt: NaiveDateTime) -> Json {
    json!({ "$date": dt.and_utc().timestamp_millis() })
}

/// Wrap an identifier as an extended-JSON object id.
pub fn oid_value(oid: &ObjectId) -> Json {
    json!({ "$oid": oid.to_hex() })
}

/// Read an extended-JSON date back into a timestamp.
pub fn as_datetime(value: &Json) -> Option<NaiveDateTime> {
    let ms = value.get("$date")?.as_i64()?;
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

/// Read an extended-JSON object id.
pub fn as_objectid(value: &Json) -> Option<ObjectId> {
    let hex = value.get("$oid")?.as_str()?;
    ObjectId::parse_hex(hex).ok()
}

/// `{"$in": [...ids]}`
pub fn in_ids(ids: &[ObjectId]) -> Json {
    json!({ "$in": ids.iter().map(oid_value).collect::<Vec<_>>() })
}

/// Shallow merge of two filter documents; keys in `overlay` win.
pub fn merge(base: Option<&Json>, overlay: Json) -> Json {
    let mut out = match base {
        Some(Json::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    if let Json::Object(overlay) = overlay {
        for (k, v) in overlay {
            out.insert(k, v);
        }
    }
    Json::Object(out)
}

/// The filter with a `{date: {$gte, $lte}}` constraint layered on top.
pub fn with_date_range(base: Option<&Json>, start: NaiveDateTime, end: NaiveDateTime) -> Json {
    merge(
        base,
        json!({ "date": { "$gte": date_value(start), "$lte": date_value(end) } }),
    )
}

/// The filter with a strict `{date: {$gt}}` lower bound layered on top.
pub fn with_date_gt(base: Option<&Json>, after: NaiveDateTime) -> Json {
    merge(base, json!({ "date": { "$gt": date_value(after) } }))
}

/// Extract `($gte, $lte)` date bounds from a filter, when present.
pub fn date_bounds(filter: Option<&Json>) -> (Option<NaiveDateTime>, Option<NaiveDateTime>) {
    let date = filter.and_then(|f| f.get("date"));
    let lower = date.and_then(|d| d.get("$gte")).and_then(as_datetime);
    let upper = date.and_then(|d| d.get("$lte")).and_then(as_datetime);
    (lower, upper)
}

/// The filter with any top-level `date` constraint removed. Used by the
/// incremental sync, which supplies its own watermark bound.
pub fn without_date_key(filter: Option<&Json>) -> Option<Json> {
    match filter {
        Some(Json::Object(map)) => {
            let mut out = map.clone();
            out.remove("date");
            if out.is_empty() {
                None
            } else {
                Some(Json::Object(out))
            }
        }
        other => other.cloned(),
    }
}

/// Midnight of a calendar day, for CLI `--min-date` style inputs.
pub fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        midnight(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn date_value_round_trip() {
        let dt = day(2024, 3, 15);
        assert_eq!(as_datetime(&date_value(dt)), Some(dt));
    }

    #[test]
    fn oid_value_round_trip() {
        let oid = ObjectId::parse_hex("64bb7ea337b9d8195e3b441d").unwrap();
        assert_eq!(as_objectid(&oid_value(&oid)), Some(oid));
    }

    #[test]
    fn merge_overlays_date_range() {
        let base = json!({ "tasks": { "$exists": true } });
        let merged = with_date_range(Some(&base), day(2024, 1, 1), day(2024, 1, 31));
        assert!(merged.get("tasks").is_some());
        let (lower, upper) = date_bounds(Some(&merged));
        assert_eq!(lower, Some(day(2024, 1, 1)));
        assert_eq!(upper, Some(day(2024, 1, 31)));
    }

    #[test]
    fn merge_replaces_existing_date_key() {
        let base = json!({ "date": { "$gte": date_value(day(2020, 1, 1)) } });
        let merged = with_date_range(Some(&base), day(2024, 2, 1), day(2024, 2, 29));
        let (lower, _) = date_bounds(Some(&merged));
        assert_eq!(lower, Some(day(2024, 2, 1)));
    }

    #[test]
    fn strip_date_key() {
        let base = json!({ "date": { "$gte": date_value(day(2020, 1, 1)) }, "lang": "en" });
        let stripped = without_date_key(Some(&base)).unwrap();
        assert!(stripped.get("date").is_none());
        assert_eq!(stripped.get("lang"), Some(&json!("en")));

        let only_date = json!({ "date": { "$gte": date_value(day(2020, 1, 1)) } });
        assert_eq!(without_date_key(Some(&only_date)), None);
        assert_eq!(without_date_key(None), None);
    }

    #[test]
    fn in_ids_builds_oid_array() {
        let oid = ObjectId::parse_hex("64bb7ea337b9d8195e3b441d").unwrap();
        let filter = in_ids(&[oid]);
        assert_eq!(
            filter["$in"][0]["$oid"].as_str(),
            Some("64bb7ea337b9d8195e3b441d")
        );
    }
}
