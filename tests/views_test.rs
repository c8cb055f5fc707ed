//! End-to-end view recalculation over a small fixture data directory.

mod common;

use common::{oid, shared_db, storage};
use indexmap::IndexMap;
use mongo_parquet::record::frame_from_records;
use mongo_parquet::schemas::parquet_models;
use mongo_parquet::storage::write_parquet_atomic;
use mongo_parquet::views::{date_ranges_with_comparisons, ViewService};
use mongo_parquet::{ObjectId, Record, Value};
use chrono::Utc;

fn doc(fields: Vec<(&str, Value)>) -> Value {
    let mut doc = IndexMap::new();
    for (k, v) in fields {
        doc.insert(k.to_string(), v);
    }
    Value::Document(doc)
}

fn str_val(s: &str) -> Value {
    Value::String(s.to_string())
}

/// Write db-shaped records through the model transform into the model's
/// on-disk location.
fn write_fixture(
    models: &std::collections::HashMap<&'static str, mongo_parquet::ParquetModel>,
    key: &str,
    records: Vec<Record>,
) {
    let model = &models[key];
    let df = frame_from_records(&model.schema, &records).unwrap();
    let mut on_disk = (model.transform)(df.lazy()).collect().unwrap();
    write_parquet_atomic(&mut on_disk, &model.target_path(), 5).unwrap();
}

#[test]
fn recalculate_views_populates_both_collections() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    let data_dir = storage.target_dirpath(false).to_path_buf();
    std::fs::create_dir_all(&data_dir).unwrap();

    let (driver, db) = shared_db();
    let models = parquet_models(&data_dir);

    let page_id = oid(0x01);
    let task_id = oid(0x02);
    let project_id = oid(0x03);
    let ux_id = oid(0x04);

    // A date inside the "last week" range so at least one preset sees data.
    let ranges = date_ranges_with_comparisons(Utc::now().date_naive());
    let week = ranges[0].range;
    let in_week = week
        .start
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp_millis();

    let mut page = Record::new();
    page.insert("_id".to_string(), Value::ObjectId(page_id));
    page.insert("url".to_string(), str_val("/benefits"));
    page.insert("title".to_string(), str_val("Benefits"));
    page.insert("lang".to_string(), str_val("en"));
    page.insert("is_404".to_string(), Value::Bool(false));
    page.insert(
        "tasks".to_string(),
        Value::Array(vec![Value::ObjectId(task_id)]),
    );
    page.insert(
        "projects".to_string(),
        Value::Array(vec![Value::ObjectId(project_id)]),
    );
    write_fixture(&models, "pages", vec![page]);

    let mut metrics = Record::new();
    metrics.insert("_id".to_string(), Value::ObjectId(oid(0x10)));
    metrics.insert("date".to_string(), Value::DateTime(in_week));
    metrics.insert("url".to_string(), str_val("/benefits"));
    metrics.insert("page".to_string(), Value::ObjectId(page_id));
    metrics.insert(
        "tasks".to_string(),
        Value::Array(vec![Value::ObjectId(task_id)]),
    );
    metrics.insert("visits".to_string(), Value::Int32(120));
    metrics.insert("dyf_yes".to_string(), Value::Int32(5));
    metrics.insert("dyf_no".to_string(), Value::Int32(2));
    metrics.insert("gsc_total_clicks".to_string(), Value::Int64(30));
    metrics.insert("gsc_total_impressions".to_string(), Value::Int64(900));
    metrics.insert("gsc_total_ctr".to_string(), Value::Float64(0.033));
    metrics.insert("gsc_total_position".to_string(), Value::Float64(4.2));
    write_fixture(&models, "page_metrics", vec![metrics]);

    let term_record = {
        let mut r = Record::new();
        r.insert("_id".to_string(), Value::ObjectId(oid(0x11)));
        r.insert("date".to_string(), Value::DateTime(in_week));
        r.insert("url".to_string(), str_val("/benefits"));
        r.insert("page".to_string(), Value::ObjectId(page_id));
        r.insert(
            "tasks".to_string(),
            Value::Array(vec![Value::ObjectId(task_id)]),
        );
        r
    };

    let mut aa = term_record.clone();
    aa.insert(
        "aa_searchterms".to_string(),
        Value::Array(vec![doc(vec![
            ("term", str_val("EI")),
            ("clicks", Value::Int32(3)),
            ("position", Value::Float64(1.0)),
            ("_id", Value::ObjectId(oid(0x20))),
        ])]),
    );
    write_fixture(&models, "aa_searchterms", vec![aa]);

    let mut gsc = term_record.clone();
    gsc.insert(
        "gsc_searchterms".to_string(),
        Value::Array(vec![doc(vec![
            ("clicks", Value::Int32(7)),
            ("ctr", Value::Float64(0.1)),
            ("impressions", Value::Int32(70)),
            ("position", Value::Float64(2.0)),
            ("term", str_val("employment insurance")),
            ("_id", Value::ObjectId(oid(0x21))),
        ])]),
    );
    write_fixture(&models, "gsc_searchterms", vec![gsc]);

    let mut activity = term_record.clone();
    activity.insert(
        "activity_map".to_string(),
        Value::Array(vec![doc(vec![
            ("link", str_val("apply now")),
            ("clicks", Value::Int32(9)),
            ("_id", Value::ObjectId(oid(0x22))),
        ])]),
    );
    write_fixture(&models, "activity_map", vec![activity]);

    let mut feedback = Record::new();
    feedback.insert("_id".to_string(), Value::ObjectId(oid(0x30)));
    feedback.insert("url".to_string(), str_val("/benefits"));
    feedback.insert("date".to_string(), Value::DateTime(in_week));
    feedback.insert("lang".to_string(), str_val("en"));
    feedback.insert("comment".to_string(), str_val("helpful"));
    feedback.insert("page".to_string(), Value::ObjectId(page_id));
    feedback.insert(
        "tasks".to_string(),
        Value::Array(vec![Value::ObjectId(task_id)]),
    );
    write_fixture(&models, "feedback", vec![feedback]);

    let mut task = Record::new();
    task.insert("_id".to_string(), Value::ObjectId(task_id));
    task.insert("title".to_string(), str_val("Apply for EI"));
    task.insert("topic".to_string(), str_val("benefits"));
    task.insert(
        "tpc_ids".to_string(),
        Value::Array(vec![Value::Int32(1001)]),
    );
    task.insert(
        "gc_tasks".to_string(),
        Value::Array(vec![doc(vec![
            ("_id", Value::ObjectId(oid(0x40))),
            ("airtable_id", str_val("rec1")),
            ("title", str_val("Apply for EI")),
            ("title_fr", str_val("Demander l'AE")),
            ("date_mapped", str_val("2024-01-01")),
        ])]),
    );
    write_fixture(&models, "tasks", vec![task]);

    let mut project = Record::new();
    project.insert("_id".to_string(), Value::ObjectId(project_id));
    project.insert("title".to_string(), str_val("EI Modernization"));
    project.insert(
        "tasks".to_string(),
        Value::Array(vec![Value::ObjectId(task_id)]),
    );
    write_fixture(&models, "projects", vec![project]);

    let mut ux_test = Record::new();
    ux_test.insert("_id".to_string(), Value::ObjectId(ux_id));
    ux_test.insert("title".to_string(), str_val("EI findability"));
    ux_test.insert("project".to_string(), Value::ObjectId(project_id));
    ux_test.insert(
        "tasks".to_string(),
        Value::Array(vec![Value::ObjectId(task_id)]),
    );
    ux_test.insert("success_rate".to_string(), Value::Float64(0.8));
    ux_test.insert("cops".to_string(), Value::Bool(false));
    write_fixture(&models, "ux_tests", vec![ux_test]);

    let mut calldriver = Record::new();
    calldriver.insert("_id".to_string(), Value::ObjectId(oid(0x50)));
    calldriver.insert("date".to_string(), Value::DateTime(in_week));
    calldriver.insert("enquiry_line".to_string(), str_val("EI"));
    calldriver.insert("topic".to_string(), str_val("benefits"));
    calldriver.insert("tpc_id".to_string(), Value::Int32(1001));
    calldriver.insert("calls".to_string(), Value::Int32(40));
    write_fixture(&models, "calldrivers", vec![calldriver]);

    let mut survey = Record::new();
    survey.insert("_id".to_string(), Value::ObjectId(oid(0x60)));
    survey.insert("url".to_string(), str_val("/benefits"));
    survey.insert("date".to_string(), Value::DateTime(in_week));
    survey.insert("gc_task".to_string(), str_val("Apply for EI"));
    survey.insert("sampling_task".to_string(), str_val("y"));
    survey.insert("able_to_complete".to_string(), str_val("Yes"));
    write_fixture(&models, "gc_tss", vec![survey]);

    let service = ViewService::new(&db, &data_dir, ".views_temp");
    service.recalculate_pages_view().unwrap();
    service.recalculate_tasks_view().unwrap();

    // One pages-view row per page per range (7 presets x 2 ranges each).
    let pages_view = driver.0.records("view_pages");
    assert_eq!(pages_view.len(), 14);
    assert!(pages_view
        .iter()
        .all(|r| matches!(r.get("_id"), Some(Value::ObjectId(_)))));
    assert!(pages_view
        .iter()
        .all(|r| r.get("pageStatus") == Some(&str_val("Live"))));

    // The week range actually aggregated the metrics.
    let week_rows: Vec<&Record> = pages_view
        .iter()
        .filter(|r| match r.get("dateRange") {
            Some(Value::Document(d)) => {
                d.get("start") == Some(&Value::DateTime(in_week))
            }
            _ => false,
        })
        .collect();
    assert_eq!(week_rows.len(), 1);
    match week_rows[0].get("visits") {
        Some(Value::Int64(visits)) => assert_eq!(*visits, 120),
        Some(Value::Int32(visits)) => assert_eq!(*visits, 120),
        other => panic!("expected aggregated visits, got {:?}", other),
    }

    let tasks_view = driver.0.records("view_tasks");
    assert_eq!(tasks_view.len(), 14);
    let week_task: Vec<&Record> = tasks_view
        .iter()
        .filter(|r| match r.get("dateRange") {
            Some(Value::Document(d)) => {
                d.get("start") == Some(&Value::DateTime(in_week))
            }
            _ => false,
        })
        .collect();
    assert_eq!(week_task.len(), 1);
    match week_task[0].get("totalCalls") {
        Some(Value::Int64(calls)) => assert_eq!(*calls, 40),
        Some(Value::Int32(calls)) => assert_eq!(*calls, 40),
        other => panic!("expected totalCalls, got {:?}", other),
    }

    let id = match week_task[0].get("_id") {
        Some(Value::ObjectId(id)) => *id,
        other => panic!("expected ObjectId _id, got {:?}", other),
    };
    assert_ne!(id, ObjectId::from_bytes([0; 12]));

    // Cleanup removes the temp dir.
    service.cleanup_temp_dir();
    assert!(!data_dir.parent().unwrap().join(".views_temp").exists());
}
