//! Search assessment results; only the 200 most recent rows are exported.

use super::util::*;
use super::{MongoCollection, ParquetModel, SyncType};
use polars::prelude::*;
use std::path::Path;

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "search_assessment",
        "search_assessment.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("date", dt_ms()),
            ("lang", DataType::String),
            ("query", DataType::String),
            ("expected_result", DataType::String),
            ("expected_position", DataType::Int32),
            ("pass", DataType::Boolean),
            ("total_searches", DataType::Int32),
            ("total_clicks", DataType::Int32),
            ("target_clicks", DataType::Int32),
        ]),
        dir_path,
    );
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("search_assessment", SyncType::Simple, model(dir_path))
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_encode("_id")])
        .sort(
            ["date"],
            SortMultipleOptions::default().with_order_descending(true),
        )
        .limit(200)
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_decode("_id")])
}
