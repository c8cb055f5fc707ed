//! The tasks reference collection.

use super::util::*;
use super::{MongoCollection, ParquetModel, SyncType};
use crate::sampling::SamplingContext;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::Value as Json;
use std::path::Path;

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "tasks",
        "tasks.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("airtable_id", DataType::String),
            ("title", DataType::String),
            ("title_fr", DataType::String),
            ("group", DataType::String),
            ("subgroup", DataType::String),
            ("topic", DataType::String),
            ("subtopic", DataType::String),
            ("sub_subtopic", str_list()),
            ("user_type", str_list()),
            ("ux_tests", oid_list()),
            ("projects", oid_list()),
            ("pages", oid_list()),
            (
                "gc_tasks",
                list_of(struct_of(vec![
                    ("_id", oid()),
                    ("airtable_id", DataType::String),
                    ("title", DataType::String),
                    ("title_fr", DataType::String),
                    ("date_mapped", DataType::String),
                ])),
            ),
            ("tpc_ids", list_of(DataType::Int32)),
            ("program", DataType::String),
            ("service", DataType::String),
            ("user_journey", str_list()),
            ("status", DataType::String),
            ("channel", str_list()),
            ("core", str_list()),
            ("portfolio", DataType::String),
        ]),
        dir_path,
    );
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model.sampling_filter = sampling_filter;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("tasks", SyncType::Simple, model(dir_path))
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_encode("_id"),
        hex_encode_list("ux_tests"),
        hex_encode_list("projects"),
        hex_encode_list("pages"),
        col("gc_tasks").list().eval(as_struct(vec![
            col("").struct_().field_by_name("_id").binary().hex_encode(),
            col("").struct_().field_by_name("airtable_id"),
            col("").struct_().field_by_name("title"),
            col("").struct_().field_by_name("title_fr"),
            col("").struct_().field_by_name("date_mapped"),
        ])),
    ])
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_decode("_id"),
        hex_decode_list("ux_tests"),
        hex_decode_list("projects"),
        hex_decode_list("pages"),
        col("gc_tasks").list().eval(as_struct(vec![
            col("").struct_().field_by_name("_id").str().hex_decode(true),
            col("").struct_().field_by_name("airtable_id"),
            col("").struct_().field_by_name("title"),
            col("").struct_().field_by_name("title_fr"),
            col("").struct_().field_by_name("date_mapped"),
        ])),
    ])
}

fn sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    ids_sampling(model, ctx, "task", "_id")
}
