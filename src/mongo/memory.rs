//! In-memory implementation of the driver boundary.
//!
//! Supports the query surface the engine actually uses: filters with
//! `$gt`/`$gte`/`$lte`/`$lt`/`$in`/`$exists`/`$eq` and scalar equality,
//! include-style projections, and `$match`/`$project`/`$group`-max
//! pipelines. Used by the test suite and by `DB_HOST=memory` dev runs.

use crate::filter::{as_datetime, as_objectid};
use crate::mongo::MongoDriver;
use crate::record::{Record, Value};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryDriver {
    collections: Mutex<BTreeMap<String, Vec<Record>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection directly (test setup).
    pub fn seed(&self, collection: &str, records: Vec<Record>) {
        let mut collections = self.collections.lock().unwrap();
        collections.entry(collection.to_string()).or_default().extend(records);
    }

    pub fn records(&self, collection: &str) -> Vec<Record> {
        let collections = self.collections.lock().unwrap();
        collections.get(collection).cloned().unwrap_or_default()
    }
}

impl MongoDriver for MemoryDriver {
    fn find(
        &self,
        collection: &str,
        filter: Option<&Json>,
        projection: Option<&Json>,
    ) -> Result<Vec<Record>> {
        let collections = self.collections.lock().unwrap();
        let records = collections.get(collection).cloned().unwrap_or_default();
        let mut matched: Vec<Record> = records
            .into_iter()
            .filter(|record| matches_filter(record, filter))
            .collect();
        if let Some(projection) = projection {
            matched = matched.into_iter().map(|r| project(r, projection)).collect();
        }
        Ok(matched)
    }

    fn aggregate(&self, collection: &str, pipeline: &[Json]) -> Result<Vec<Record>> {
        let mut records = self.find(collection, None, None)?;
        for stage in pipeline {
            let stage = stage
                .as_object()
                .ok_or_else(|| eyre!("Pipeline stage must be a document"))?;
            if let Some(filter) = stage.get("$match") {
                records.retain(|record| matches_filter(record, Some(filter)));
            } else if let Some(projection) = stage.get("$project") {
                records = records.into_iter().map(|r| project(r, projection)).collect();
            } else if let Some(group) = stage.get("$group") {
                records = group_max(&records, group)?;
            } else {
                return Err(eyre!("Unsupported pipeline stage: {:?}", stage.keys()));
            }
        }
        Ok(records)
    }

    fn insert_many(&self, collection: &str, records: Vec<Record>, _ordered: bool) -> Result<usize> {
        let inserted = records.len();
        let mut collections = self.collections.lock().unwrap();
        collections
            .entry(collection.to_string())
            .or_default()
            .extend(records);
        Ok(inserted)
    }

    fn delete_many(&self, collection: &str, filter: &Json) -> Result<usize> {
        let mut collections = self.collections.lock().unwrap();
        let records = collections.entry(collection.to_string()).or_default();
        let before = records.len();
        records.retain(|record| !matches_filter(record, Some(filter)));
        Ok(before - records.len())
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections.keys().cloned().collect())
    }

    fn create_collection(&self, collection: &str) -> Result<()> {
        let mut collections = self.collections.lock().unwrap();
        collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    fn estimated_document_count(&self, collection: &str) -> Result<u64> {
        let collections = self.collections.lock().unwrap();
        Ok(collections.get(collection).map_or(0, |r| r.len() as u64))
    }
}

fn matches_filter(record: &Record, filter: Option<&Json>) -> bool {
    let filter = match filter.and_then(Json::as_object) {
        Some(filter) => filter,
        None => return true,
    };
    filter.iter().all(|(field, condition)| {
        let value = record.get(field);
        match condition.as_object() {
            Some(ops) if ops.keys().any(|k| k.starts_with('$')) && !is_extended_scalar(condition) => {
                ops.iter().all(|(op, operand)| {
                    matches_operator(value, op, operand)
                })
            }
            _ => value.is_some_and(|v| scalar_eq(v, condition)),
        }
    })
}

/// `{"$date": ...}` / `{"$oid": ...}` are scalars, not operator documents.
fn is_extended_scalar(json: &Json) -> bool {
    json.get("$date").is_some() || json.get("$oid").is_some()
}

fn matches_operator(value: Option<&Value>, op: &str, operand: &Json) -> bool {
    match op {
        "$exists" => operand.as_bool().unwrap_or(false) == value.is_some_and(|v| !v.is_null()),
        "$eq" => value.is_some_and(|v| scalar_eq(v, operand)),
        "$in" => {
            let candidates = match operand.as_array() {
                Some(candidates) => candidates,
                None => return false,
            };
            match value {
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| candidates.iter().any(|c| scalar_eq(item, c))),
                Some(v) => candidates.iter().any(|c| scalar_eq(v, c)),
                None => false,
            }
        }
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let ordering = match value.and_then(|v| compare(v, operand)) {
                Some(ordering) => ordering,
                None => return false,
            };
            match op {
                "$gt" => ordering.is_gt(),
                "$gte" => ordering.is_ge(),
                "$lt" => ordering.is_lt(),
                _ => ordering.is_le(),
            }
        }
        _ => false,
    }
}

fn scalar_eq(value: &Value, json: &Json) -> bool {
    if let Some(dt) = as_datetime(json) {
        return matches!(value, Value::DateTime(ms) if *ms == dt.and_utc().timestamp_millis());
    }
    if let Some(oid) = as_objectid(json) {
        return matches!(value, Value::ObjectId(v) if *v == oid);
    }
    match (value, json) {
        (Value::String(s), Json::String(j)) => s == j,
        (Value::Bool(b), Json::Bool(j)) => b == j,
        (Value::Int32(n), Json::Number(j)) => j.as_i64() == Some(*n as i64),
        (Value::Int64(n), Json::Number(j)) => j.as_i64() == Some(*n),
        (Value::Float64(f), Json::Number(j)) => j.as_f64() == Some(*f),
        (Value::Null, Json::Null) => true,
        _ => false,
    }
}

fn compare(value: &Value, json: &Json) -> Option<std::cmp::Ordering> {
    if let Some(dt) = as_datetime(json) {
        let ms = dt.and_utc().timestamp_millis();
        return match value {
            Value::DateTime(v) => Some(v.cmp(&ms)),
            _ => None,
        };
    }
    match (value, json) {
        (Value::Int32(v), Json::Number(j)) => j.as_i64().map(|j| (*v as i64).cmp(&j)),
        (Value::Int64(v), Json::Number(j)) => j.as_i64().map(|j| v.cmp(&j)),
        (Value::Float64(v), Json::Number(j)) => {
            j.as_f64().and_then(|j| v.partial_cmp(&j))
        }
        (Value::String(v), Json::String(j)) => Some(v.as_str().cmp(j.as_str())),
        _ => None,
    }
}

/// Include-style projections keep `_id` plus fields mapped to 1; computed
/// projections (`$objectToArray` etc.) keep the stored value as-is.
fn project(record: Record, projection: &Json) -> Record {
    let projection = match projection.as_object() {
        Some(projection) => projection,
        None => return record,
    };
    let include: Vec<&String> = projection.keys().collect();
    record
        .into_iter()
        .filter(|(key, _)| key == "_id" || include.iter().any(|k| *k == key))
        .collect()
}

/// `{$group: {_id: null, <name>: {$max: "$<field>"}}}`
fn group_max(records: &[Record], group: &Json) -> Result<Vec<Record>> {
    let group = group
        .as_object()
        .ok_or_else(|| eyre!("$group must be a document"))?;
    let mut out = Record::new();
    for (name, spec) in group {
        if name == "_id" {
            continue;
        }
        let field = spec
            .get("$max")
            .and_then(Json::as_str)
            .and_then(|f| f.strip_prefix('$'))
            .ok_or_else(|| eyre!("Only $max group accumulators are supported"))?;
        let max = records
            .iter()
            .filter_map(|r| r.get(field))
            .filter(|v| !v.is_null())
            .cloned()
            .max_by(|a, b| value_ord(a, b));
        out.insert(name.clone(), max.unwrap_or(Value::Null));
    }
    if records.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![out])
}

fn value_ord(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
        (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
        (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
        (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{date_value, oid_value};
    use crate::objectid::ObjectId;
    use serde_json::json;

    fn record_with_date(ms: i64) -> Record {
        let mut record = Record::new();
        record.insert("_id".to_string(), Value::ObjectId(ObjectId::new()));
        record.insert("date".to_string(), Value::DateTime(ms));
        record
    }

    #[test]
    fn date_range_filters() {
        let driver = MemoryDriver::new();
        driver.seed("metrics", vec![record_with_date(100), record_with_date(200)]);

        let dt = chrono::DateTime::from_timestamp_millis(150).unwrap().naive_utc();
        let filter = json!({ "date": { "$gt": date_value(dt) } });
        let found = driver.find("metrics", Some(&filter), None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["date"], Value::DateTime(200));
    }

    #[test]
    fn in_filter_matches_array_fields() {
        let oid = ObjectId::parse_hex("64bb7ea337b9d8195e3b441d").unwrap();
        let mut record = Record::new();
        record.insert("tasks".to_string(), Value::Array(vec![Value::ObjectId(oid)]));
        let driver = MemoryDriver::new();
        driver.seed("metrics", vec![record]);

        let filter = json!({ "tasks": { "$in": [oid_value(&oid)] } });
        assert_eq!(driver.find("metrics", Some(&filter), None).unwrap().len(), 1);

        let other = ObjectId::new();
        let filter = json!({ "tasks": { "$in": [oid_value(&other)] } });
        assert_eq!(driver.find("metrics", Some(&filter), None).unwrap().len(), 0);
    }

    #[test]
    fn exists_filter() {
        let mut with_field = Record::new();
        with_field.insert("aa_searchterms".to_string(), Value::Array(vec![]));
        let without_field = Record::new();
        let driver = MemoryDriver::new();
        driver.seed("metrics", vec![with_field, without_field]);

        let filter = json!({ "aa_searchterms": { "$exists": true } });
        assert_eq!(driver.find("metrics", Some(&filter), None).unwrap().len(), 1);
    }

    #[test]
    fn group_max_pipeline() {
        let driver = MemoryDriver::new();
        driver.seed("metrics", vec![record_with_date(100), record_with_date(500)]);

        let pipeline = vec![json!({ "$group": { "_id": null, "max_date": { "$max": "$date" } } })];
        let out = driver.aggregate("metrics", &pipeline).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["max_date"], Value::DateTime(500));
    }

    #[test]
    fn delete_many_with_empty_filter_clears() {
        let driver = MemoryDriver::new();
        driver.seed("metrics", vec![record_with_date(1)]);
        assert_eq!(driver.delete_many("metrics", &json!({})).unwrap(), 1);
        assert_eq!(driver.estimated_document_count("metrics").unwrap(), 0);
    }
}
