//! The urls reference collection. Uses a `$map`/`$objectToArray` projection
//! server-side; `metadata` is folded back into a document on insert.

use super::util::*;
use super::{MongoCollection, ParquetModel, SyncType};
use crate::sampling::SamplingContext;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::{json, Value as Json};
use std::path::Path;

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "urls",
        "urls.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("page", oid()),
            ("url", DataType::String),
            ("title", DataType::String),
            ("is_404", DataType::Boolean),
            (
                "metadata",
                list_of(struct_of(vec![
                    ("k", DataType::String),
                    ("v", DataType::String),
                ])),
            ),
            (
                "langHrefs",
                struct_of(vec![("en", DataType::String), ("fr", DataType::String)]),
            ),
            (
                "hashes",
                list_of(struct_of(vec![
                    ("date", dt_ms()),
                    ("hash", DataType::String),
                ])),
            ),
            (
                "links",
                list_of(struct_of(vec![
                    ("href", DataType::String),
                    ("text", DataType::String),
                ])),
            ),
            ("all_titles", str_list()),
            ("latest_snapshot", DataType::String),
            ("last_checked", dt_ms()),
            ("last_modified", dt_ms()),
        ]),
        dir_path,
    );
    model.use_aggregation = true;
    model.projection = Some(json!({
        "_id": 1,
        "url": 1,
        "title": 1,
        "page": 1,
        "hashes": 1,
        "links": 1,
        "langHrefs": 1,
        "is_404": 1,
        "metadata": {
            "$map": {
                "input": { "$objectToArray": "$metadata" },
                "as": "item",
                "in": { "k": "$$item.k", "v": { "$toString": "$$item.v" } },
            }
        },
        "all_titles": 1,
        "latest_snapshot": 1,
        "last_checked": 1,
        "last_modified": 1,
    }));
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model.sampling_filter = sampling_filter;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("urls", SyncType::Simple, model(dir_path))
        .with_kv_object_fields(&["metadata"])
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_encode("_id"), hex_encode("page")])
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_decode("_id"), hex_decode("page")])
}

fn sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    ids_sampling(model, ctx, "page", "page")
}
