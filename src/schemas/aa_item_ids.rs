//! Analytics item-id mappings.

use super::util::*;
use super::{MongoCollection, ParquetModel, SyncType};
use polars::prelude::*;
use std::path::Path;

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "aa_item_ids",
        "aa_item_ids.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("type", DataType::String),
            ("page", oid()),
            ("pages", oid_list()),
            ("itemId", DataType::String),
            ("value", DataType::String),
        ]),
        dir_path,
    );
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("aa_item_ids", SyncType::Simple, model(dir_path))
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_encode("_id"),
        hex_encode("page"),
        hex_encode_list("pages"),
    ])
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_decode("_id"),
        hex_decode("page"),
        hex_decode_list("pages"),
    ])
}
