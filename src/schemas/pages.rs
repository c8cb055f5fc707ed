//! The pages reference collection. `metadata` comes out of the database as a
//! `$objectToArray` key-value array and is folded back into a document on
//! insert.

use super::util::*;
use super::{MongoCollection, ParquetModel, SyncType};
use crate::sampling::SamplingContext;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::{json, Value as Json};
use std::path::Path;

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "pages",
        "pages.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("url", DataType::String),
            ("title", DataType::String),
            ("airtable_id", DataType::String),
            ("lang", DataType::String),
            ("altLangHref", DataType::String),
            ("redirect", DataType::String),
            ("is_404", DataType::Boolean),
            (
                "metadata",
                list_of(struct_of(vec![
                    ("k", DataType::String),
                    ("v", DataType::String),
                ])),
            ),
            ("owners", DataType::String),
            ("sections", DataType::String),
            ("lastChecked", dt_ms()),
            ("lastModified", dt_ms()),
            ("tasks", oid_list()),
            ("projects", oid_list()),
            ("ux_tests", oid_list()),
        ]),
        dir_path,
    );
    model.projection = Some(json!({
        "_id": 1,
        "url": 1,
        "title": 1,
        "airtable_id": 1,
        "lang": 1,
        "altLangHref": 1,
        "redirect": 1,
        "is_404": 1,
        "metadata": { "$objectToArray": "$metadata" },
        "owners": 1,
        "sections": 1,
        "lastChecked": 1,
        "lastModified": 1,
        "tasks": 1,
        "projects": 1,
        "ux_tests": 1,
    }));
    model.use_aggregation = true;
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model.sampling_filter = sampling_filter;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("pages", SyncType::Simple, model(dir_path))
        .with_kv_object_fields(&["metadata"])
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_encode("_id"),
        hex_encode_list("tasks"),
        hex_encode_list("projects"),
        hex_encode_list("ux_tests"),
    ])
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_decode("_id"),
        hex_decode_list("tasks"),
        hex_decode_list("projects"),
        hex_decode_list("ux_tests"),
    ])
}

fn sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    ids_sampling(model, ctx, "page", "_id")
}
