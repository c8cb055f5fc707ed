//! Bidirectional synchronization between a MongoDB database and a Parquet
//! store (local directory or remote object storage), plus the derived
//! pages/tasks view builder.
//!
//! The engine is a single-threaded batch processor: typed frames flow from
//! the database through per-collection transforms into (possibly
//! hive-partitioned) Parquet files and back, with incremental date-watermark
//! syncs, md5-gated uploads, and atomic file replacement throughout.

pub mod controller;
pub mod filter;
pub mod io;
pub mod mongo;
pub mod objectid;
pub mod record;
pub mod sampling;
pub mod schemas;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod views;

pub use controller::{CollectionFilter, MongoParquet};
pub use io::MongoParquetIO;
pub use mongo::{connect_driver, MongoConfig, MongoDb, MongoDriver};
pub use objectid::ObjectId;
pub use record::{Record, Value};
pub use sampling::{SampleDateRange, SamplingContext};
pub use schemas::{collection_models, MongoCollection, ParquetModel};
pub use storage::StorageClient;
pub use sync::SyncUtils;
