//! Click-map links per page, exploded out of `pages_metrics` into a secondary
//! file. Each document keeps at most its 300 most-clicked links.

use super::util::*;
use super::{ParquetModel, PartitionBy};
use crate::sampling::SamplingContext;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::Value as Json;
use std::path::Path;

fn link_struct() -> DataType {
    struct_of(vec![
        ("link", DataType::String),
        ("clicks", DataType::Int32),
        ("_id", oid()),
    ])
}

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "pages_metrics",
        "pages_metrics_activity_map.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("date", dt_ms()),
            ("url", DataType::String),
            ("page", oid()),
            ("tasks", oid_list()),
            ("projects", oid_list()),
            ("ux_tests", oid_list()),
            ("activity_map", list_of(link_struct())),
        ]),
        dir_path,
    );
    model.filter = Some(exists_filter("activity_map"));
    model.partition_by = Some(PartitionBy::Month);
    model.secondary_schema = Some(schema_of(vec![("activity_map", list_of(link_struct()))]));
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model.sampling_filter = sampling_filter;
    model
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.filter(
        col("activity_map")
            .is_not_null()
            .and(col("activity_map").list().len().neq(lit(0))),
    )
    .with_columns([col("activity_map")
        .list()
        .eval(col("").sort_by(
            [col("").struct_().field_by_name("clicks")],
            SortMultipleOptions::default().with_order_descending(true),
        ))
        .list()
        .slice(lit(0), lit(300))])
    .rename(["_id"], ["_doc_id"], true)
    .explode(by_name(["activity_map"], true))
    .unnest(by_name(["activity_map"], true), None)
    .with_columns([
        hex_encode("_doc_id"),
        hex_encode("page"),
        hex_encode_list("tasks"),
        hex_encode_list("projects"),
        hex_encode_list("ux_tests"),
        hex_encode("_id"),
    ])
    .rename(["_doc_id", "_id"], ["_id", "_link_id"], true)
    .sort(
        ["date", "url", "clicks"],
        SortMultipleOptions::default().with_order_descending_multi([false, false, true]),
    )
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.select([
        hex_decode("_id"),
        as_struct(vec![
            col("link"),
            col("clicks"),
            col("_link_id").str().hex_decode(true).alias("_id"),
        ])
        .alias("activity_map"),
    ])
    .group_by([col("_id")])
    .agg([col("activity_map")])
}

fn sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    tasks_sampling_filter(model, ctx)
}
