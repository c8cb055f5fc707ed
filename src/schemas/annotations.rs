//! Calendar annotations for dashboard events.

use super::util::*;
use super::{MongoCollection, ParquetModel, SyncType};
use polars::prelude::*;
use std::path::Path;

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "annotations",
        "annotations.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("airtable_id", DataType::String),
            ("data_affected", str_list()),
            ("date_entered", dt_ms()),
            ("description", DataType::String),
            ("description_fr", DataType::String),
            ("event_date", dt_ms()),
            ("event_type", DataType::String),
            ("notes", DataType::String),
            ("notes_fr", DataType::String),
            ("predictive_insight", DataType::String),
            ("predictive_insight_fr", DataType::String),
            ("title", DataType::String),
            ("title_fr", DataType::String),
        ]),
        dir_path,
    );
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("annotations", SyncType::Simple, model(dir_path))
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_encode("_id")])
        .sort(["event_date"], SortMultipleOptions::default())
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_decode("_id")])
}
