//! GC Task Success Survey responses (the `gc_tasks` collection),
//! year-partitioned and synced incrementally.

use super::util::*;
use super::{MongoCollection, ParquetModel, PartitionBy, SyncType};
use crate::sampling::SamplingContext;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::Value as Json;
use std::path::Path;

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "gc_tasks",
        "gc_tss.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("url", DataType::String),
            ("date", dt_ms()),
            ("tasks", oid_list()),
            ("language", DataType::String),
            ("device", DataType::String),
            ("screener", DataType::Boolean),
            ("department", DataType::String),
            ("theme", DataType::String),
            ("grouping", DataType::String),
            ("gc_task", DataType::String),
            ("satisfaction", DataType::String),
            ("ease", DataType::String),
            ("able_to_complete", DataType::String),
            ("what_would_improve", DataType::String),
            ("reason_not_complete", DataType::String),
            ("sampling_invitation", DataType::String),
            ("sampling_gc", DataType::String),
            ("sampling_canada", DataType::String),
            ("sampling_theme", DataType::String),
            ("sampling_institution", DataType::String),
            ("sampling_group", DataType::String),
            ("sampling_task", DataType::String),
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
    MongoCollection::new("gc_tasks", SyncType::Incremental, model(dir_path))
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_encode("_id"), hex_encode_list("tasks")])
        .sort(["date", "url"], SortMultipleOptions::default())
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_decode("_id"), hex_decode_list("tasks")])
}

fn sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    date_range_sampling_filter(model, ctx)
}
