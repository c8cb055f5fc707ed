//! Partitioned export and incremental sync, end to end against the in-memory
//! driver and a temp data directory.

mod common;

use common::{date_ms, metrics_record, oid, shared_db, storage, MetricsRecord};
use mongo_parquet::io::MongoParquetIO;
use mongo_parquet::schemas::util::{
    dt_ms, hex_decode, hex_decode_list, hex_encode, hex_encode_list, oid as oid_type, oid_list,
    schema_of,
};
use mongo_parquet::schemas::{MongoCollection, ParquetModel, PartitionBy, SyncType};
use mongo_parquet::{SamplingContext, SyncUtils};
use polars::prelude::*;
use serde_json::json;
use std::path::Path;

fn transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_encode("_id"), hex_encode_list("tasks")])
        .sort(["date", "url"], SortMultipleOptions::default())
}

fn reverse_transform(lf: LazyFrame) -> LazyFrame {
    lf.with_columns([hex_decode("_id"), hex_decode_list("tasks")])
}

/// A small month-partitioned collection exercising the same paths as the
/// full metrics registry entries.
fn test_collection(dir: &Path) -> MongoCollection {
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
    model.partition_by = Some(PartitionBy::Month);
    model.filter = Some(json!({
        "date": {
            "$gte": mongo_parquet::filter::date_value(common::datetime(2024, 1, 1, 0)),
            "$lte": mongo_parquet::filter::date_value(common::datetime(2024, 3, 31, 0)),
        }
    }));
    model.transform = transform;
    model.reverse_transform = reverse_transform;
    MongoCollection::new("metrics", SyncType::Incremental, model)
}

fn read_partition(dir: &Path, year: i32, month: u32) -> DataFrame {
    let path = dir
        .join("metrics.parquet")
        .join(format!("year={}", year))
        .join(format!("month={}", month))
        .join("0.parquet");
    let pl_path = PlRefPath::try_from_path(&path).unwrap();
    LazyFrame::scan_parquet(pl_path, Default::default())
        .unwrap()
        .collect()
        .unwrap()
}

#[test]
fn partitioned_export_respects_month_boundaries() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    let (driver, db) = shared_db();
    let sampling = SamplingContext::new();

    // One row at the very end of January, one at the very start of February.
    driver.0.seed(
        "metrics",
        vec![
            metrics_record(MetricsRecord {
                id: oid(1),
                date_ms: date_ms(2024, 1, 31, 23),
                url: "/a",
                visits: 10,
                tasks: vec![oid(9)],
            }),
            metrics_record(MetricsRecord {
                id: oid(2),
                date_ms: date_ms(2024, 2, 1, 0),
                url: "/b",
                visits: 20,
                tasks: vec![oid(9)],
            }),
        ],
    );

    let collection = test_collection(storage.target_dirpath(false));
    let io = MongoParquetIO::new(&db, &storage, &sampling);
    io.export_to_parquet(&collection, false).unwrap();

    let data_dir = storage.target_dirpath(false);
    let jan = read_partition(data_dir, 2024, 1);
    let feb = read_partition(data_dir, 2024, 2);
    assert_eq!(jan.height(), 1);
    assert_eq!(feb.height(), 1);

    let jan_urls: Vec<Option<&str>> = jan.column("url").unwrap().str().unwrap().into_iter().collect();
    assert_eq!(jan_urls, vec![Some("/a")]);
    let feb_urls: Vec<Option<&str>> = feb.column("url").unwrap().str().unwrap().into_iter().collect();
    assert_eq!(feb_urls, vec![Some("/b")]);

    // No partition beyond the two months with data.
    assert!(!data_dir.join("metrics.parquet/year=2024/month=3").exists());
}

#[test]
fn incremental_sync_appends_new_rows_and_queues_the_partition() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    let (driver, db) = shared_db();
    let sampling = SamplingContext::new();

    // Pre-sync state: rows through March 15.
    let mut initial = Vec::new();
    for day in 11..=15 {
        initial.push(metrics_record(MetricsRecord {
            id: oid(day),
            date_ms: date_ms(2024, 3, day as u32, 0),
            url: "/a",
            visits: day as i32,
            tasks: vec![oid(9)],
        }));
    }
    driver.0.seed("metrics", initial);

    let collection = test_collection(storage.target_dirpath(false));
    let io = MongoParquetIO::new(&db, &storage, &sampling);
    io.export_to_parquet(&collection, false).unwrap();

    let partition_path = storage
        .target_dirpath(false)
        .join("metrics.parquet/year=2024/month=3/0.parquet");
    let pre_sync = read_partition(storage.target_dirpath(false), 2024, 3);
    assert_eq!(pre_sync.height(), 5);

    // New database rows through March 20.
    let mut fresh = Vec::new();
    for day in 16..=20 {
        fresh.push(metrics_record(MetricsRecord {
            id: oid(day),
            date_ms: date_ms(2024, 3, day as u32, 0),
            url: "/a",
            visits: day as i32,
            tasks: vec![oid(9)],
        }));
    }
    driver.0.seed("metrics", fresh);

    let mut sync_utils = SyncUtils::new(storage.target_dirpath(false));
    io.sync_incremental_parquet(&collection, &mut sync_utils, false)
        .unwrap();

    let post_sync = read_partition(storage.target_dirpath(false), 2024, 3);
    assert_eq!(post_sync.height(), 10);

    // Pre-sync rows are still present and unchanged.
    let pre_ids: Vec<String> = pre_sync
        .column("_id")
        .unwrap()
        .str()
        .unwrap()
        .into_iter()
        .map(|v| v.unwrap().to_string())
        .collect();
    let post_ids: Vec<String> = post_sync
        .column("_id")
        .unwrap()
        .str()
        .unwrap()
        .into_iter()
        .map(|v| v.unwrap().to_string())
        .collect();
    for id in &pre_ids {
        assert!(post_ids.contains(id));
    }

    // The changed partition (and only it) is queued for upload.
    assert_eq!(sync_utils.upload_queue, vec![partition_path]);
}

#[test]
fn sync_without_new_rows_is_a_noop_on_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    let (driver, db) = shared_db();
    let sampling = SamplingContext::new();

    driver.0.seed(
        "metrics",
        vec![metrics_record(MetricsRecord {
            id: oid(1),
            date_ms: date_ms(2024, 3, 15, 0),
            url: "/a",
            visits: 1,
            tasks: vec![],
        })],
    );

    let collection = test_collection(storage.target_dirpath(false));
    let io = MongoParquetIO::new(&db, &storage, &sampling);
    io.export_to_parquet(&collection, false).unwrap();

    let partition_path = storage
        .target_dirpath(false)
        .join("metrics.parquet/year=2024/month=3/0.parquet");
    let hash_before = SyncUtils::file_md5(&partition_path).unwrap();

    let mut sync_utils = SyncUtils::new(storage.target_dirpath(false));
    io.sync_incremental_parquet(&collection, &mut sync_utils, false)
        .unwrap();

    assert!(sync_utils.upload_queue.is_empty());
    assert_eq!(SyncUtils::file_md5(&partition_path).unwrap(), hash_before);
}

#[test]
fn incremental_sync_requires_a_date_column() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    let (_, db) = shared_db();
    let sampling = SamplingContext::new();

    let model = ParquetModel::base(
        "ref",
        "ref.parquet",
        schema_of(vec![("_id", oid_type()), ("title", DataType::String)]),
        storage.target_dirpath(false),
    );
    let collection = MongoCollection::new("ref", SyncType::Incremental, model);

    let io = MongoParquetIO::new(&db, &storage, &sampling);
    let mut sync_utils = SyncUtils::new(storage.target_dirpath(false));
    let err = io
        .sync_incremental_parquet(&collection, &mut sync_utils, false)
        .unwrap_err();
    assert!(err.to_string().contains("no date column"));
}
