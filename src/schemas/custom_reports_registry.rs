//! Saved custom-report configurations.

use super::util::*;
use super::{MongoCollection, ParquetModel, SyncType};
use polars::prelude::*;
use std::path::Path;

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "custom_reports_registry",
        "custom_reports_registry.parquet",
        schema_of(vec![
            ("_id", oid()),
            (
                "config",
                struct_of(vec![
                    (
                        "dateRange",
                        struct_of(vec![("start", dt_ms()), ("end", dt_ms())]),
                    ),
                    ("granularity", DataType::String),
                    ("urls", str_list()),
                    ("grouped", DataType::Boolean),
                    ("metrics", str_list()),
                    ("breakdownDimension", DataType::String),
                ]),
            ),
            ("configHash", DataType::String),
        ]),
        dir_path,
    );
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("custom_reports_registry", SyncType::Simple, model(dir_path))
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_encode("_id")])
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_decode("_id")])
}
