//! Search-console terms per page, exploded out of `pages_metrics` into a
//! secondary file keyed by document id + element id.

use super::util::*;
use super::{ParquetModel, PartitionBy};
use crate::sampling::SamplingContext;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::Value as Json;
use std::path::Path;

fn term_struct() -> DataType {
    struct_of(vec![
        ("clicks", DataType::Int32),
        ("ctr", DataType::Float64),
        ("impressions", DataType::Int32),
        ("position", DataType::Float64),
        ("term", DataType::String),
        ("_id", oid()),
    ])
}

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "pages_metrics",
        "pages_metrics_gsc_searchterms.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("date", dt_ms()),
            ("url", DataType::String),
            ("page", oid()),
            ("tasks", oid_list()),
            ("projects", oid_list()),
            ("ux_tests", oid_list()),
            ("gsc_searchterms", list_of(term_struct())),
        ]),
        dir_path,
    );
    model.filter = Some(exists_filter("gsc_searchterms"));
    model.partition_by = Some(PartitionBy::Month);
    model.secondary_schema = Some(schema_of(vec![("gsc_searchterms", list_of(term_struct()))]));
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model.sampling_filter = sampling_filter;
    model
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.filter(
        col("gsc_searchterms")
            .is_not_null()
            .and(col("gsc_searchterms").list().len().neq(lit(0))),
    )
    .rename(["_id"], ["_doc_id"], true)
    .explode(by_name(["gsc_searchterms"], true))
    .unnest(by_name(["gsc_searchterms"], true), None)
    .with_columns([
        hex_encode("_doc_id"),
        hex_encode("page"),
        hex_encode_list("tasks"),
        hex_encode_list("projects"),
        hex_encode_list("ux_tests"),
        round4_f32("ctr"),
        round4_f32("position"),
        hex_encode("_id"),
    ])
    .rename(["_doc_id", "_id"], ["_id", "_term_id"], true)
    .sort(
        ["date", "url", "clicks"],
        SortMultipleOptions::default().with_order_descending_multi([false, false, true]),
    )
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.select([
        hex_decode("_id"),
        as_struct(vec![
            col("clicks"),
            col("ctr"),
            col("impressions"),
            col("position"),
            col("term"),
            col("_term_id").str().hex_decode(true).alias("_id"),
        ])
        .alias("gsc_searchterms"),
    ])
    .group_by([col("_id")])
    .agg([col("gsc_searchterms")])
}

fn sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    tasks_sampling_filter(model, ctx)
}
