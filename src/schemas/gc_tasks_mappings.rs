//! Mappings from GC task names to task documents.

use super::util::*;
use super::{MongoCollection, ParquetModel, SyncType};
use polars::prelude::*;
use std::path::Path;

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "gc_tasks_mappings",
        "gc_tasks_mappings.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("airtable_id", DataType::String),
            ("title", DataType::String),
            ("title_fr", DataType::String),
            ("tasks", oid_list()),
            ("date_mapped", dt_ms()),
        ]),
        dir_path,
    );
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("gc_tasks_mappings", SyncType::Simple, model(dir_path))
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_encode("_id"), hex_encode_list("tasks")])
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_decode("_id"), hex_decode_list("tasks")])
}
