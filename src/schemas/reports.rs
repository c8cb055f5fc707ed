//! Published reports with bilingual attachments.

use super::util::*;
use super::{MongoCollection, ParquetModel, SyncType};
use polars::prelude::*;
use std::path::Path;

fn attachment_struct() -> DataType {
    struct_of(vec![
        ("id", DataType::String),
        ("url", DataType::String),
        ("filename", DataType::String),
        ("size", DataType::Int32),
        ("storage_url", DataType::String),
        ("_id", oid()),
    ])
}

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "reports",
        "reports.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("airtable_id", DataType::String),
            ("createdAt", dt_ms()),
            ("date", dt_ms()),
            ("en_attachment", list_of(attachment_struct())),
            ("en_title", DataType::String),
            ("fr_attachment", list_of(attachment_struct())),
            ("fr_title", DataType::String),
            ("type", DataType::String),
            ("updatedAt", dt_ms()),
        ]),
        dir_path,
    );
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("reports", SyncType::Simple, model(dir_path))
}

fn attachment_fields(id_codec: fn(Expr) -> Expr) -> Expr {
    as_struct(vec![
        col("").struct_().field_by_name("id"),
        col("").struct_().field_by_name("url"),
        col("").struct_().field_by_name("filename"),
        col("").struct_().field_by_name("size"),
        col("").struct_().field_by_name("storage_url"),
        id_codec(col("").struct_().field_by_name("_id")),
    ])
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_encode("_id"),
        col("en_attachment")
            .list()
            .eval(attachment_fields(|e| e.binary().hex_encode())),
        col("fr_attachment")
            .list()
            .eval(attachment_fields(|e| e.binary().hex_encode())),
    ])
    .sort(["date"], SortMultipleOptions::default())
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_decode("_id"),
        col("en_attachment")
            .list()
            .eval(attachment_fields(|e| e.str().hex_decode(true))),
        col("fr_attachment")
            .list()
            .eval(attachment_fields(|e| e.str().hex_decode(true))),
    ])
}
