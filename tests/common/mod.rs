//! Shared helpers for integration tests: a shareable in-memory driver and
//! record/frame builders.

use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use mongo_parquet::mongo::memory::MemoryDriver;
use mongo_parquet::mongo::MongoDriver;
use mongo_parquet::{MongoDb, ObjectId, Record, StorageClient, Value};
use mongo_parquet_cli::StorageBackend;
use serde_json::Value as Json;
use std::path::Path;
use std::sync::Arc;

/// A driver handle the test keeps after handing the database adapter its own
/// copy, so inserted records can be inspected.
#[derive(Clone)]
pub struct SharedDriver(pub Arc<MemoryDriver>);

impl MongoDriver for SharedDriver {
    fn find(
        &self,
        collection: &str,
        filter: Option<&Json>,
        projection: Option<&Json>,
    ) -> color_eyre::Result<Vec<Record>> {
        self.0.find(collection, filter, projection)
    }

    fn aggregate(&self, collection: &str, pipeline: &[Json]) -> color_eyre::Result<Vec<Record>> {
        self.0.aggregate(collection, pipeline)
    }

    fn insert_many(
        &self,
        collection: &str,
        records: Vec<Record>,
        ordered: bool,
    ) -> color_eyre::Result<usize> {
        self.0.insert_many(collection, records, ordered)
    }

    fn delete_many(&self, collection: &str, filter: &Json) -> color_eyre::Result<usize> {
        self.0.delete_many(collection, filter)
    }

    fn list_collections(&self) -> color_eyre::Result<Vec<String>> {
        self.0.list_collections()
    }

    fn create_collection(&self, collection: &str) -> color_eyre::Result<()> {
        self.0.create_collection(collection)
    }

    fn estimated_document_count(&self, collection: &str) -> color_eyre::Result<u64> {
        self.0.estimated_document_count(collection)
    }
}

pub fn shared_db() -> (SharedDriver, MongoDb) {
    let driver = SharedDriver(Arc::new(MemoryDriver::new()));
    let db = MongoDb::new(Box::new(driver.clone()));
    (driver, db)
}

/// Local-only storage client rooted in a temp directory (no remote creds).
pub fn storage(root: &Path) -> StorageClient {
    StorageClient::new(root.join("data"), root.join("sample"), StorageBackend::Azure)
        .expect("storage client")
}

/// Deterministic 12-byte id for test fixtures.
pub fn oid(n: u8) -> ObjectId {
    ObjectId::from_bytes([n; 12])
}

pub fn datetime(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

pub fn date_ms(y: i32, m: u32, d: u32, h: u32) -> i64 {
    datetime(y, m, d, h).and_utc().timestamp_millis()
}

pub struct MetricsRecord {
    pub id: ObjectId,
    pub date_ms: i64,
    pub url: &'static str,
    pub visits: i32,
    pub tasks: Vec<ObjectId>,
}

pub fn metrics_record(r: MetricsRecord) -> Record {
    let mut record = Record::new();
    record.insert("_id".to_string(), Value::ObjectId(r.id));
    record.insert("date".to_string(), Value::DateTime(r.date_ms));
    record.insert("url".to_string(), Value::String(r.url.to_string()));
    record.insert("visits".to_string(), Value::Int32(r.visits));
    record.insert(
        "tasks".to_string(),
        Value::Array(r.tasks.into_iter().map(Value::ObjectId).collect()),
    );
    record
}

pub fn searchterm(term: &str, clicks: i32, position: f64, id: ObjectId) -> Value {
    let mut doc = IndexMap::new();
    doc.insert("term".to_string(), Value::String(term.to_string()));
    doc.insert("clicks".to_string(), Value::Int32(clicks));
    doc.insert("position".to_string(), Value::Float64(position));
    doc.insert("_id".to_string(), Value::ObjectId(id));
    Value::Document(doc)
}
