//! Per-page daily metrics: the largest collection, month-partitioned and
//! synced incrementally. Also the sentinel checked before any sync.

use super::util::*;
use super::{MongoCollection, ParquetModel, PartitionBy, SyncType};
use crate::sampling::SamplingContext;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::Value as Json;
use std::path::Path;

/// Non-emptiness of this collection gates every sync run.
pub const METRICS_SENTINEL_COLLECTION: &str = "pages_metrics";

pub fn model(dir_path: &Path) -> ParquetModel {
    let mut model = ParquetModel::base(
        "pages_metrics",
        "pages_metrics.parquet",
        schema(),
        dir_path,
    );
    model.partition_by = Some(PartitionBy::Month);
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    model.sampling_filter = sampling_filter;
    model
}

pub fn collection(dir_path: &Path) -> MongoCollection {
    MongoCollection::new("pages_metrics", SyncType::Incremental, model(dir_path)).with_secondaries(
        vec![
            super::aa_searchterms::model(dir_path),
            super::activity_map::model(dir_path),
            super::gsc_searchterms::model(dir_path),
        ],
    )
}

fn schema() -> Schema {
    let mut fields = vec![
        ("_id", oid()),
        ("date", dt_ms()),
        ("url", DataType::String),
        ("page", oid()),
        ("tasks", oid_list()),
        ("projects", oid_list()),
        ("ux_tests", oid_list()),
        ("average_time_spent", DataType::Float64),
        ("bouncerate", DataType::Float64),
        ("dyf_no", DataType::Int32),
        ("dyf_submit", DataType::Int32),
        ("dyf_yes", DataType::Int32),
        ("fwylf_cant_find_info", DataType::Int32),
        ("fwylf_error", DataType::Int32),
        ("fwylf_hard_to_understand", DataType::Int32),
        ("fwylf_other", DataType::Int32),
        ("gsc_total_clicks", DataType::Int64),
        ("gsc_total_ctr", DataType::Float64),
        ("gsc_total_impressions", DataType::Int64),
        ("gsc_total_position", DataType::Float64),
        ("nav_menu_initiated", DataType::Int32),
    ];
    for rap in [
        "rap_404",
        "rap_access_code",
        "rap_blank_form",
        "rap_cant_find",
        "rap_completed",
        "rap_gc_key",
        "rap_info_missing",
        "rap_info_wrong",
        "rap_initiated",
        "rap_link_not_working",
        "rap_login_error",
        "rap_other",
        "rap_other_login",
        "rap_securekey",
        "rap_sin",
        "rap_spelling",
    ] {
        fields.push((rap, DataType::Int32));
    }
    fields.extend([
        ("views", DataType::Int32),
        ("visitors", DataType::Int32),
        ("visits", DataType::Int32),
        ("visits_device_desktop", DataType::Int32),
        ("visits_device_mobile", DataType::Int32),
        ("visits_device_other", DataType::Int32),
        ("visits_device_tablet", DataType::Int32),
    ]);
    for geo in [
        "visits_geo_ab",
        "visits_geo_bc",
        "visits_geo_mb",
        "visits_geo_nb",
        "visits_geo_nl",
        "visits_geo_ns",
        "visits_geo_nt",
        "visits_geo_nu",
        "visits_geo_on",
        "visits_geo_outside_canada",
        "visits_geo_pe",
        "visits_geo_qc",
        "visits_geo_sk",
        "visits_geo_us",
        "visits_geo_yt",
    ] {
        fields.push((geo, DataType::Int32));
    }
    fields.extend([
        ("visits_referrer_other", DataType::Int32),
        ("visits_referrer_searchengine", DataType::Int32),
        ("visits_referrer_social", DataType::Int32),
        ("visits_referrer_typed_bookmarked", DataType::Int32),
    ]);
    schema_of(fields)
}

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_encode("_id"),
        hex_encode("page"),
        hex_encode_list("tasks"),
        hex_encode_list("projects"),
        hex_encode_list("ux_tests"),
        round4_f32("average_time_spent"),
        round4_f32("bouncerate"),
        round4_f32("gsc_total_ctr"),
        round4_f32("gsc_total_position"),
    ])
    .sort(["date", "url"], SortMultipleOptions::default())
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([
        hex_decode("_id"),
        hex_decode("page"),
        hex_decode_list("tasks"),
        hex_decode_list("projects"),
        hex_decode_list("ux_tests"),
    ])
}

fn sampling_filter(model: &ParquetModel, ctx: &SamplingContext) -> Result<Option<Json>> {
    tasks_sampling_filter(model, ctx)
}
