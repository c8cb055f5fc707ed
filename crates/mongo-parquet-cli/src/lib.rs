//! Shared CLI definitions for mongo-parquet.
//!
//! Used by the main application and by the build script (manpage).

use clap::{Parser, ValueEnum};

/// Remote object-storage backend
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum StorageBackend {
    /// Azure Blob Storage (account name + key or connection string)
    Azure,
    /// Amazon S3 (access key id + secret + region)
    S3,
}

/// Command-line arguments for mongo-parquet
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mongo-parquet",
    version,
    about = "Sync MongoDB collections with Parquet files, locally or in remote object storage"
)]
pub struct Args {
    /// Export data from MongoDB to Parquet files
    #[arg(long = "export-from-mongo", action)]
    pub export_from_mongo: bool,

    /// Import Parquet data into MongoDB
    #[arg(long = "import-to-mongo", action)]
    pub import_to_mongo: bool,

    /// Upload local Parquet files to remote storage (combinable with export/sync)
    #[arg(long = "upload-to-remote", action)]
    pub upload_to_remote: bool,

    /// Download Parquet files from remote storage
    #[arg(long = "download-from-remote", action)]
    pub download_from_remote: bool,

    /// Incrementally sync Parquet files with MongoDB
    #[arg(long = "sync-parquet", action)]
    pub sync_parquet: bool,

    /// Rebuild the derived pages/tasks views
    #[arg(long = "recalculate-views", action)]
    pub recalculate_views: bool,

    /// Operate on the sample directory with sampling filters
    #[arg(long = "sample", action)]
    pub sample: bool,

    /// Only process these collections (mutually exclusive with --exclude)
    #[arg(long = "include", num_args = 1.., value_name = "COLLECTION")]
    pub include: Vec<String>,

    /// Process all collections except these (mutually exclusive with --include)
    #[arg(long = "exclude", num_args = 1.., value_name = "COLLECTION")]
    pub exclude: Vec<String>,

    /// Only import rows with `date` on or after this day (YYYY-MM-DD)
    #[arg(long = "min-date", value_name = "YYYY-MM-DD")]
    pub min_date: Option<String>,

    /// Empty target collections before importing (ignored without --import-to-mongo)
    #[arg(long = "drop", action)]
    pub drop: bool,

    /// Read Parquet files directly from remote storage when importing
    #[arg(long = "from-remote", action)]
    pub from_remote: bool,

    /// Delete local files after a successful upload
    #[arg(long = "cleanup-local", action)]
    pub cleanup_local: bool,

    /// Remove the .sync_temp/.views_temp directories when the run finishes
    #[arg(long = "cleanup-temp-dir", action)]
    pub cleanup_temp_dir: bool,

    /// Directory for sample Parquet data
    #[arg(long = "sample-dir", value_name = "DIR", default_value = "sample")]
    pub sample_dir: String,

    /// Directory for full Parquet data
    #[arg(long = "data-dir", value_name = "DIR", default_value = "data")]
    pub data_dir: String,

    /// MongoDB database name
    #[arg(long = "db-name", value_name = "NAME", default_value = "upd-test")]
    pub db_name: String,

    /// Remote storage backend
    #[arg(long = "storage", value_enum, default_value = "azure")]
    pub storage: StorageBackend,
}

impl Args {
    /// True when no action flag was given (the binary prints usage and exits).
    pub fn no_action(&self) -> bool {
        !(self.export_from_mongo
            || self.import_to_mongo
            || self.upload_to_remote
            || self.download_from_remote
            || self.sync_parquet
            || self.recalculate_views)
    }
}
