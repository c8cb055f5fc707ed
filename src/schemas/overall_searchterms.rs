//! Overall search-term secondaries for `overall_metrics`: search-console
//! terms plus internal-search terms (en/fr), exploded per element with the
//! document id carried as `_id` and the element id as `_term_id`.

use super::util::*;
use super::ParquetModel;
use crate::sampling::SamplingContext;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::Value as Json;
use std::path::Path;

fn gsc_term_struct() -> DataType {
    struct_of(vec![
        ("clicks", DataType::Int32),
        ("ctr", DataType::Float64),
        ("impressions", DataType::Int32),
        ("position", DataType::Float64),
        ("term", DataType::String),
        ("_id", oid()),
    ])
}

fn aa_term_struct() -> DataType {
    struct_of(vec![
        ("term", DataType::String),
        ("clicks", DataType::Int32),
        ("position", DataType::Float64),
        ("_id", oid()),
    ])
}

pub fn gsc_model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "overall_metrics",
        "overall_metrics_gsc_searchterms.parquet",
        schema_of(vec![
            ("_id", oid()),
            ("date", dt_ms()),
            ("gsc_searchterms", list_of(gsc_term_struct())),
        ]),
        dir_path,
    );
    model.filter = Some(exists_filter("gsc_searchterms"));
    model.secondary_schema = Some(schema_of(vec![(
        "gsc_searchterms",
        list_of(gsc_term_struct()),
    )]));
    model.transform = gsc_transform;
    model.reverse_transform = gsc_reverse_transform;
    model.sampling_filter = sampling_filter;
    model
}

fn gsc_transform(lf: LazyFrame) -> LazyFrame {
    lf.filter(
        col("gsc_searchterms")
            .is_not_null()
            .and(col("gsc_searchterms").list().len().neq(lit(0))),
    )
    .rename(["_id"], ["_doc_id"], true)
    .explode(by_name(["gsc_searchterms"], true))
    .unnest(by_name(["gsc_searchterms"], true), None)
    .with_columns([
        hex_encode("_doc_id"),
        hex_encode("_id"),
        round4_f32("ctr"),
        round4_f32("position"),
    ])
    .rename(["_doc_id", "_id"], ["_id", "_term_id"], true)
    .sort(
        ["date", "clicks"],
        SortMultipleOptions::default().with_order_descending_multi([false, true]),
    )
}

fn gsc_reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.select([
        hex_decode("_id"),
        as_struct(vec![
            col("clicks"),
            col("ctr"),
            col("impressions"),
            col("position"),
            col("term"),
            col("_term_id").str().hex_decode(true).alias("_id"),
        ])
        .alias("gsc_searchterms"),
    ])
    .group_by([col("_id")])
    .agg([col("gsc_searchterms")])
}

pub fn aa_en_model(dir_path: &Path) -> ParquetModel {
    aa_model(dir_path, "aa_searchterms_en", "overall_metrics_aa_searchterms_en.parquet")
}

pub fn aa_fr_model(dir_path: &Path) -> ParquetModel {
    aa_model(dir_path, "aa_searchterms_fr", "overall_metrics_aa_searchterms_fr.parquet")
}

fn aa_model(
    dir_path: &Path,
    field: &'static str,
    parquet_filename: &'static str,
) -> ParquetModel {
    let mut model = ParquetModel::base(
        "overall_metrics",
        parquet_filename,
        schema_of(vec![
            ("_id", oid()),
            ("date", dt_ms()),
            (field, list_of(aa_term_struct())),
        ]),
        dir_path,
    );
    model.filter = Some(exists_filter(field));
    model.secondary_schema = Some(schema_of(vec![(field, list_of(aa_term_struct()))]));
    model.transform = if field == "aa_searchterms_en" {
        aa_en_transform
    } else {
        aa_fr_transform
    };
    model.reverse_transform = if field == "aa_searchterms_en" {
        aa_en_reverse_transform
    } else {
        aa_fr_reverse_transform
    };
    model.sampling_filter = sampling_filter;
    model
}

fn aa_transform(lf: LazyFrame, field: &str) -> LazyFrame {
    lf.filter(
        col(field)
            .is_not_null()
            .and(col(field).list().len().neq(lit(0))),
    )
    .rename(["_id"], ["_doc_id"], true)
    .explode(by_name([field], true))
    .unnest(by_name([field], true), None)
    .with_columns([
        hex_encode("_doc_id"),
        hex_encode("_id"),
        round4_f32("position"),
    ])
    .rename(["_doc_id", "_id"], ["_id", "_term_id"], true)
    .sort(
        ["date", "clicks"],
        SortMultipleOptions::default().with_order_descending_multi([false, true]),
    )
}

fn aa_reverse_transform(lf: LazyFrame, field: &str) -> LazyFrame {
    lf.select([
        hex_decode("_id"),
        as_struct(vec![
            col("term"),
            col("clicks"),
            col("position"),
            col("_term_id").str().hex_decode(true).alias("_id"),
        ])
        .alias(field),
    ])
    .group_by([col("_id")])
    .agg([col(field)])
}

fn aa_en_transform(lf: LazyFrame) -> LazyFrame {
    aa_transform(lf, "aa_searchterms_en")
}

fn aa_fr_transform(lf: LazyFrame) -> LazyFrame {
    aa_transform(lf, "aa_searchterms_fr")
}

fn aa_en_reverse_transform(lf: LazyFrame) -> LazyFrame {
    aa_reverse_transform(lf, "aa_searchterms_en")
}

fn aa_fr_reverse_transform(lf: LazyFrame) -> LazyFrame {
    aa_reverse_transform(lf, "aa_searchterms_fr")
}

fn sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    date_range_sampling_filter(model, ctx)
}
