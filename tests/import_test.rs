//! Export/import round trips and sampling filter composition.

mod common;

use common::{date_ms, datetime, metrics_record, oid, shared_db, storage, MetricsRecord};
use mongo_parquet::io::MongoParquetIO;
use mongo_parquet::sampling::SampleDateRange;
use mongo_parquet::schemas::util::{
    dt_ms, hex_decode, hex_decode_list, hex_encode, hex_encode_list, oid as oid_type, oid_list,
    schema_of,
};
use mongo_parquet::schemas::{collection_models, MongoCollection, ParquetModel, SyncType};
use mongo_parquet::{filter, MongoDriver, SamplingContext, Value};
use polars::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_encode("_id"), hex_encode_list("tasks")])
        .sort(["date", "url"], SortMultipleOptions::default())
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_decode("_id"), hex_decode_list("tasks")])
}

/// A small non-partitioned collection for round-trip tests.
fn simple_collection(dir: &Path) -> MongoCollection {
    let mut model = ParquetModel::base(
        "metrics",
        "metrics.parquet",
        schema_of(vec![
            ("_id", oid_type()),
            ("date", dt_ms()),
            ("url", DataType::String),
            ("visits", DataType::Int32),
            ("tasks", oid_list()),
        ]),
        dir,
    );
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    MongoCollection::new("metrics", SyncType::Simple, model)
}

fn seeded_records() -> Vec<mongo_parquet::Record> {
    (1u8..=5)
        .map(|n| {
            metrics_record(MetricsRecord {
                id: oid(n),
                date_ms: date_ms(2024, 3, n as u32, 0),
                url: "/page",
                visits: n as i32,
                tasks: vec![oid(100 + n)],
            })
        })
        .collect()
}

#[test]
fn export_import_reexport_preserves_rows() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    let (driver, db) = shared_db();
    let sampling = SamplingContext::new();
    let io = MongoParquetIO::new(&db, &storage, &sampling);

    driver.0.seed("metrics", seeded_records());
    let collection = simple_collection(storage.target_dirpath(false));

    io.export_to_parquet(&collection, false).unwrap();
    let first_export = storage
        .read_parquet("metrics.parquet", false, false, false, None)
        .unwrap();
    assert_eq!(first_export.height(), 5);

    // Wipe the database, import from the file, then export again.
    driver.0.delete_many("metrics", &json!({})).unwrap();
    io.import_from_parquet(&collection, false, false, None, Some(2))
        .unwrap();

    let imported = driver.0.records("metrics");
    assert_eq!(imported.len(), 5);
    let imported_ids: BTreeSet<String> = imported
        .iter()
        .map(|r| match &r["_id"] {
            Value::ObjectId(id) => id.to_hex(),
            other => panic!("expected ObjectId _id, got {:?}", other),
        })
        .collect();
    let expected_ids: BTreeSet<String> = (1u8..=5).map(|n| oid(n).to_hex()).collect();
    assert_eq!(imported_ids, expected_ids);

    io.export_to_parquet(&collection, false).unwrap();
    let second_export = storage
        .read_parquet("metrics.parquet", false, false, false, None)
        .unwrap();
    assert_eq!(second_export.height(), first_export.height());

    let ids = |df: &DataFrame| -> BTreeSet<String> {
        df.column("_id")
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect()
    };
    assert_eq!(ids(&first_export), ids(&second_export));
}

#[test]
fn min_date_restricts_imported_rows() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    let (driver, db) = shared_db();
    let sampling = SamplingContext::new();
    let io = MongoParquetIO::new(&db, &storage, &sampling);

    driver.0.seed("metrics", seeded_records());
    let collection = simple_collection(storage.target_dirpath(false));
    io.export_to_parquet(&collection, false).unwrap();

    driver.0.delete_many("metrics", &json!({})).unwrap();
    io.import_from_parquet(&collection, false, false, Some(datetime(2024, 3, 4, 0)), None)
        .unwrap();

    let imported = driver.0.records("metrics");
    assert_eq!(imported.len(), 2);
}

#[test]
fn sampling_filter_composes_task_ids_and_date_range() {
    let dir = tempfile::tempdir().unwrap();
    let t1 = oid(0x11);
    let t2 = oid(0x12);

    let mut ctx = SamplingContext::new();
    ctx.set_ids("task", vec![t1, t2]);
    ctx.set_date_range(SampleDateRange {
        start: Some(datetime(2024, 1, 1, 0)),
        end: None,
    });

    let metrics = collection_models(dir.path())
        .into_iter()
        .find(|c| c.collection == "pages_metrics")
        .unwrap();
    let composed = metrics.primary.get_sampling_filter(&ctx).unwrap().unwrap();

    let expected = json!({
        "tasks": { "$in": [filter::oid_value(&t1), filter::oid_value(&t2)] },
        "date": { "$gte": filter::date_value(datetime(2024, 1, 1, 0)) },
    });
    assert_eq!(composed, expected);
}

#[test]
fn sampled_export_writes_only_matching_rows() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    let (driver, db) = shared_db();

    let sampled_task = oid(0x21);
    let mut sampling = SamplingContext::new();
    sampling.set_ids("task", vec![sampled_task]);
    sampling.set_date_range(SampleDateRange {
        start: Some(datetime(2024, 1, 1, 0)),
        end: None,
    });

    driver.0.seed(
        "metrics",
        vec![
            metrics_record(MetricsRecord {
                id: oid(1),
                date_ms: date_ms(2024, 3, 1, 0),
                url: "/sampled",
                visits: 1,
                tasks: vec![sampled_task],
            }),
            // Wrong task
            metrics_record(MetricsRecord {
                id: oid(2),
                date_ms: date_ms(2024, 3, 1, 0),
                url: "/other",
                visits: 1,
                tasks: vec![oid(0x22)],
            }),
            // Right task, before the sampled date range
            metrics_record(MetricsRecord {
                id: oid(3),
                date_ms: date_ms(2023, 3, 1, 0),
                url: "/old",
                visits: 1,
                tasks: vec![sampled_task],
            }),
        ],
    );

    let mut collection = simple_collection(storage.target_dirpath(true));
    collection.primary.sampling_filter = mongo_parquet::schemas::util::tasks_sampling_filter;

    let io = MongoParquetIO::new(&db, &storage, &sampling);
    io.export_to_parquet(&collection, true).unwrap();

    let df = storage
        .read_parquet("metrics.parquet", true, false, false, None)
        .unwrap();
    assert_eq!(df.height(), 1);
    let urls: Vec<&str> = df
        .column("url")
        .unwrap()
        .str()
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(urls, ["/sampled"]);
}
