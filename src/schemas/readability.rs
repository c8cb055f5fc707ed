//! Per-page readability scores.

use super::util::*;
use super::{MongoCollection, ParquetModel, SyncType};
use crate::sampling::SamplingContext;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::Value as Json;
use std::path::Path;

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "readability",
        "readability.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("page", oid()),
            ("date", dt_ms()),
            ("url", DataType::String),
            ("avg_words_per_header", DataType::Float64),
            ("avg_words_per_paragraph", DataType::Float64),
            ("final_fk_score", DataType::Float64),
            ("fk_points", DataType::Float64),
            ("hash", DataType::String),
            ("header_points", DataType::Float64),
            ("lang", DataType::String),
            ("original_score", DataType::Float64),
            ("paragraph_points", DataType::Float64),
            ("total_headings", DataType::Int32),
            ("total_paragraph", DataType::Int32),
            ("total_score", DataType::Float64),
            ("total_sentences", DataType::Int32),
            ("total_syllables", DataType::Int32),
            ("total_words", DataType::Int32),
            (
                "word_counts",
                list_of(struct_of(vec![
                    ("word", DataType::String),
                    ("count", DataType::Int32),
                ])),
            ),
        ]),
        dir_path,
    );
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model.sampling_filter = sampling_filter;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("readability", SyncType::Simple, model(dir_path))
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_encode("_id"), hex_encode("page")])
        .sort(["date"], SortMultipleOptions::default())
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_decode("_id"), hex_decode("page")])
}

fn sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    ids_sampling(model, ctx, "page", "page")
}
