//! Shared schema shorthands and transform expression helpers.

use crate::filter::merge;
use crate::sampling::{sample_date_range_filter, sample_ids_filter, SamplingContext};
use crate::schemas::ParquetModel;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::Value as Json;

/// Build a schema from `(name, dtype)` pairs.
pub fn schema_of(fields: Vec<(&str, DataType)>) -> Schema {
    Schema::from_iter(
        fields
            .into_iter()
            .map(|(name, dtype)| Field::new(name.into(), dtype)),
    )
}

/// Binary identifier column (12-byte ObjectId).
pub fn oid() -> DataType {
    DataType::Binary
}

pub fn oid_list() -> DataType {
    DataType::List(Box::new(DataType::Binary))
}

/// Millisecond timestamp column.
pub fn dt_ms() -> DataType {
    DataType::Datetime(TimeUnit::Milliseconds, None)
}

pub fn str_list() -> DataType {
    DataType::List(Box::new(DataType::String))
}

pub fn struct_of(fields: Vec<(&str, DataType)>) -> DataType {
    DataType::Struct(
        fields
            .into_iter()
            .map(|(name, dtype)| Field::new(name.into(), dtype))
            .collect(),
    )
}

pub fn list_of(inner: DataType) -> DataType {
    DataType::List(Box::new(inner))
}

/// Hex-encode a binary identifier column.
pub fn hex_encode(name: &str) -> Expr {
    col(name).binary().hex_encode()
}

/// Hex-decode an identifier column back to binary.
pub fn hex_decode(name: &str) -> Expr {
    col(name).str().hex_decode(true)
}

/// Hex-encode every element of a list-of-identifiers column.
pub fn hex_encode_list(name: &str) -> Expr {
    col(name).list().eval(col("").binary().hex_encode())
}

pub fn hex_decode_list(name: &str) -> Expr {
    col(name).list().eval(col("").str().hex_decode(true))
}

/// Round to 4 decimals and narrow to f32 (ctr/position-style metrics).
pub fn round4_f32(name: &str) -> Expr {
    col(name).round(4, RoundMode::HalfToEven).cast(DataType::Float32)
}

/// Sampling filter used by the metrics-family models: the static filter plus
/// `tasks $in <sampled task ids>` and the sampled date range.
pub fn tasks_sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    let with_tasks = merge(model.filter.as_ref(), sample_ids_filter(ctx, "task", "tasks")?);
    Ok(Some(merge(Some(&with_tasks), sample_date_range_filter(ctx)?)))
}

/// Sampling filter restricted to a sampled id set on an arbitrary field.
/// Model modules wrap this in a named fn to fit the fn-pointer slot.
pub fn ids_sampling(
    model: &ParquetModel,
    ctx: &SamplingContext,
    kind: &str,
    field: &str,
) -> Result<Option<Json>> {
    Ok(Some(merge(
        model.filter.as_ref(),
        sample_ids_filter(ctx, kind, field)?,
    )))
}

/// Sampling filter on the sampled task ids only (no date restriction).
pub fn tasks_only_sampling_filter(
    model: &ParquetModel,
    ctx: &SamplingContext,
) -> Result<Option<Json>> {
    ids_sampling(model, ctx, "task", "tasks")
}

/// Sampling filter restricted to the sampled date range only.
pub fn date_range_sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    Ok(Some(merge(model.filter.as_ref(), sample_date_range_filter(ctx)?)))
}

/// `{field: {"$exists": true}}` filter fragment.
pub fn exists_filter(field: &str) -> Json {
    serde_json::json!({ field: { "$exists": true } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectid::ObjectId;
    use crate::sampling::{SampleDateRange, SamplingContext};
    use crate::schemas::ParquetModel;
    use chrono::NaiveDate;
    use std::path::Path;

    #[test]
    fn sampling_filter_composes_tasks_and_dates() {
        let mut ctx = SamplingContext::new();
        ctx.set_ids(
            "task",
            vec![ObjectId::parse_hex("64bb7ea337b9d8195e3b441d").unwrap()],
        );
        ctx.set_date_range(SampleDateRange {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0),
            end: None,
        });

        let model = ParquetModel::base(
            "pages_metrics",
            "pages_metrics.parquet",
            schema_of(vec![("_id", oid())]),
            Path::new("."),
        );
        let filter = tasks_sampling_filter(&model, &ctx).unwrap().unwrap();
        assert_eq!(
            filter["tasks"]["$in"][0]["$oid"].as_str(),
            Some("64bb7ea337b9d8195e3b441d")
        );
        assert!(filter["date"]["$gte"].is_object());
    }

    #[test]
    fn schema_shorthands() {
        let s = schema_of(vec![("_id", oid()), ("date", dt_ms()), ("tags", str_list())]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.get("_id"), Some(&DataType::Binary));
        assert_eq!(s.get("date"), Some(&dt_ms()));
    }
}
