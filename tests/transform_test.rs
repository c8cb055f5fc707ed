//! Transform/reverse-transform round trips at the frame level.

mod common;

use common::{date_ms, oid, searchterm};
use mongo_parquet::record::{frame_from_records, records_from_frame};
use mongo_parquet::schemas::collection_models;
use mongo_parquet::{ObjectId, Record, Value};
use polars::prelude::*;
use std::path::Path;

fn metrics_collection(dir: &Path) -> mongo_parquet::MongoCollection {
    collection_models(dir)
        .into_iter()
        .find(|c| c.collection == "pages_metrics")
        .unwrap()
}

#[test]
fn id_hex_round_trip_through_transforms() {
    let dir = tempfile::tempdir().unwrap();
    let collection = metrics_collection(dir.path());
    let model = &collection.primary;

    let id = ObjectId::parse_hex("64bb7ea337b9d8195e3b441d").unwrap();
    let mut record = Record::new();
    record.insert("_id".to_string(), Value::ObjectId(id));
    record.insert("date".to_string(), Value::DateTime(date_ms(2024, 3, 1, 0)));
    record.insert("url".to_string(), Value::String("/a".to_string()));
    record.insert("visits".to_string(), Value::Int32(3));

    let df = frame_from_records(&model.schema, &[record]).unwrap();
    let on_disk = (model.transform)(df.lazy()).collect().unwrap();

    // On disk, the identifier is its 24-char hex rendering.
    let hex = on_disk
        .column("_id")
        .unwrap()
        .str()
        .unwrap()
        .get(0)
        .unwrap()
        .to_string();
    assert_eq!(hex, "64bb7ea337b9d8195e3b441d");

    let back = (model.reverse_transform)(on_disk.lazy()).collect().unwrap();
    let records = records_from_frame(&back).unwrap();
    assert_eq!(records[0]["_id"], Value::ObjectId(id));
}

#[test]
fn secondary_explode_and_implode_preserves_elements() {
    let dir = tempfile::tempdir().unwrap();
    let collection = metrics_collection(dir.path());
    let aa = collection
        .secondaries
        .iter()
        .find(|m| m.parquet_filename.contains("aa_searchterms"))
        .unwrap();

    let doc_id = oid(0xA);
    let mut record = Record::new();
    record.insert("_id".to_string(), Value::ObjectId(doc_id));
    record.insert("date".to_string(), Value::DateTime(date_ms(2024, 3, 1, 0)));
    record.insert("url".to_string(), Value::String("/a".to_string()));
    record.insert(
        "aa_searchterms".to_string(),
        Value::Array(vec![
            searchterm("x", 3, 1.5, oid(0xB)),
            searchterm("y", 1, 2.0, oid(0xC)),
        ]),
    );

    let df = frame_from_records(&aa.schema, &[record]).unwrap();
    let exploded = (aa.transform)(df.lazy()).collect().unwrap();

    // Two rows keyed by the document id, with distinct element ids.
    assert_eq!(exploded.height(), 2);
    let doc_ids: Vec<&str> = exploded
        .column("_id")
        .unwrap()
        .str()
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    assert!(doc_ids.iter().all(|id| *id == doc_id.to_hex()));
    let term_ids: Vec<&str> = exploded
        .column("_term_id")
        .unwrap()
        .str()
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    assert_ne!(term_ids[0], term_ids[1]);

    // Re-grouping yields one row with both elements; clicks sum to 4.
    let assembled = (aa.reverse_transform)(exploded.lazy()).collect().unwrap();
    assert_eq!(assembled.height(), 1);
    let records = records_from_frame(&assembled).unwrap();
    match &records[0]["aa_searchterms"] {
        Value::Array(terms) => {
            assert_eq!(terms.len(), 2);
            let clicks: i64 = terms
                .iter()
                .map(|t| match t {
                    Value::Document(doc) => match doc["clicks"] {
                        Value::Int32(n) => n as i64,
                        Value::Int64(n) => n,
                        _ => 0,
                    },
                    _ => 0,
                })
                .sum();
            assert_eq!(clicks, 4);
        }
        other => panic!("expected a list of terms, got {:?}", other),
    }
}

#[test]
fn prepare_for_insert_fills_declared_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let collection = metrics_collection(dir.path());

    let mut record = Record::new();
    record.insert("_id".to_string(), Value::ObjectId(oid(1)));
    record.insert("date".to_string(), Value::DateTime(date_ms(2024, 3, 1, 0)));
    record.insert("url".to_string(), Value::String("/a".to_string()));
    // tasks/projects/ux_tests are absent entirely.

    let df = frame_from_records(&collection.primary.schema, &[record]).unwrap();
    let prepared = collection.prepare_for_insert(&df, true).unwrap();
    assert_eq!(prepared.len(), 1);

    for field in ["tasks", "projects", "ux_tests"] {
        assert_eq!(
            prepared[0].get(field),
            Some(&Value::Array(Vec::new())),
            "{} should default to an empty list",
            field
        );
    }

    // Nulls without a declared default are dropped, not inserted as null.
    assert!(prepared[0].get("visits").is_none());
}

#[test]
fn prepare_for_insert_decodes_hex_identifier_fields() {
    let dir = tempfile::tempdir().unwrap();
    let collection = metrics_collection(dir.path());

    // A frame shaped like the on-disk file (hex string ids).
    let df = df!(
        "_id" => ["64bb7ea337b9d8195e3b441d"],
        "url" => ["/a"],
    )
    .unwrap();

    let prepared = collection.prepare_for_insert(&df, true).unwrap();
    assert_eq!(
        prepared[0]["_id"],
        Value::ObjectId(ObjectId::parse_hex("64bb7ea337b9d8195e3b441d").unwrap())
    );
    // Plain strings that aren't identifier-bearing fields stay strings.
    assert_eq!(prepared[0]["url"], Value::String("/a".to_string()));
}
