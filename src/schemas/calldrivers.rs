//! Call-driver records, year-partitioned and synced incrementally.

use super::util::*;
use super::{MongoCollection, ParquetModel, PartitionBy, SyncType};
use crate::sampling::SamplingContext;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::Value as Json;
use std::path::Path;

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "calldrivers",
        "calldrivers.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("airtable_id", DataType::String),
            ("date", dt_ms()),
            ("enquiry_line", DataType::String),
            ("topic", DataType::String),
            ("subtopic", DataType::String),
            ("sub_subtopic", DataType::String),
            ("tpc_id", DataType::Int32),
            ("impact", DataType::Float64),
            ("calls", DataType::Int32),
            ("selfserve_yes", DataType::Int32),
            ("selfserve_no", DataType::Int32),
            ("selfserve_na", DataType::Int32),
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
    MongoCollection::new("calldrivers", SyncType::Incremental, model(dir_path))
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_encode("_id"),
        hex_encode_list("tasks"),
        hex_encode_list("projects"),
        round4_f32("impact"),
    ])
    .sort(["date"], SortMultipleOptions::default())
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_decode("_id"),
        hex_decode_list("tasks"),
        hex_decode_list("projects"),
    ])
}

fn sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    date_range_sampling_filter(model, ctx)
}
