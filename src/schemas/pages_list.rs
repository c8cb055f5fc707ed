//! The published-pages list (Airtable-sourced).

use super::util::*;
use super::{MongoCollection, ParquetModel, SyncType};
use polars::prelude::*;
use std::path::Path;

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "pages_list",
        "pages_list.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("airtable_id", DataType::String),
            ("url", DataType::String),
            ("title", DataType::String),
            // values: 'en', 'fr', or ''
            ("lang", DataType::String),
            ("last_255", DataType::String),
            ("owners", DataType::String),
            ("sections", DataType::String),
            ("updatedAt", dt_ms()),
            ("createdAt", dt_ms()),
        ]),
        dir_path,
    );
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("pages_list", SyncType::Simple, model(dir_path))
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_encode("_id"),
        // normalize empty/null lang
        col("lang").fill_null(lit("")).str().strip_chars(lit(Null {})),
    ])
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_decode("_id")])
}
