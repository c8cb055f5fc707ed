//! The projects reference collection, with attachment structs.

use super::util::*;
use super::{MongoCollection, ParquetModel, SyncType};
use crate::sampling::SamplingContext;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::Value as Json;
use std::path::Path;

fn attachment_struct() -> DataType {
    struct_of(vec![
        ("id", DataType::String),
        ("url", DataType::String),
        ("filename", DataType::String),
        ("type", DataType::String),
        ("size", DataType::Int32),
        ("storage_url", DataType::String),
        ("_id", oid()),
    ])
}

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "projects",
        "projects.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("title", DataType::String),
            ("ux_tests", oid_list()),
            ("pages", oid_list()),
            ("tasks", oid_list()),
            ("description", DataType::String),
            ("attachments", list_of(attachment_struct())),
        ]),
        dir_path,
    );
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model.sampling_filter = sampling_filter;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("projects", SyncType::Simple, model(dir_path))
}

fn attachment_fields(id_codec: fn(Expr) -> Expr) -> Expr {
    as_struct(vec![
        col("").struct_().field_by_name("id"),
        col("").struct_().field_by_name("url"),
        col("").struct_().field_by_name("filename"),
        col("").struct_().field_by_name("type"),
        col("").struct_().field_by_name("size"),
        col("").struct_().field_by_name("storage_url"),
        id_codec(col("").struct_().field_by_name("_id")),
    ])
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_encode("_id"),
        hex_encode_list("ux_tests"),
        hex_encode_list("pages"),
        hex_encode_list("tasks"),
        col("attachments")
            .list()
            .eval(attachment_fields(|e| e.binary().hex_encode())),
    ])
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_decode("_id"),
        hex_decode_list("ux_tests"),
        hex_decode_list("pages"),
        hex_decode_list("tasks"),
        col("attachments")
            .list()
            .eval(attachment_fields(|e| e.str().hex_decode(true))),
    ])
}

fn sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    ids_sampling(model, ctx, "project", "_id")
}
