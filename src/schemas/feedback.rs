//! Visitor feedback comments, year-partitioned and synced incrementally.

use super::util::*;
use super::{MongoCollection, ParquetModel, PartitionBy, SyncType};
use crate::sampling::SamplingContext;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::Value as Json;
use std::path::Path;

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "feedback",
        "feedback.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("airtable_id", DataType::String),
            ("url", DataType::String),
            ("date", dt_ms()),
            ("lang", DataType::String),
            ("comment", DataType::String),
            ("words", str_list()),
            ("tags", str_list()),
            ("status", DataType::String),
            ("whats_wrong", DataType::String),
            ("main_section", DataType::String),
            ("theme", DataType::String),
            ("page", oid()),
            ("tasks", oid_list()),
            ("projects", oid_list()),
        ]),
        dir_path,
    );
    model.partition_by = Some(PartitionBy::Year);
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model.sampling_filter = sampling_filter;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("feedback", SyncType::Incremental, model(dir_path))
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_encode("_id"),
        hex_encode("page"),
        hex_encode_list("tasks"),
        hex_encode_list("projects"),
    ])
    .sort(["date", "url"], SortMultipleOptions::default())
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_decode("_id"),
        hex_decode("page"),
        hex_decode_list("tasks"),
        hex_decode_list("projects"),
    ])
}

fn sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    tasks_sampling_filter(model, ctx)
}
