//! Local and remote Parquet storage.
//!
//! Local data lives under a data (or sample) directory; the remote side is an
//! object store (Azure Blob or S3) holding the same relative layout. Every
//! local write goes through a `.tmp.parquet` sibling and an atomic rename.

use crate::sync::{promote, tmp_path};
use chrono::NaiveDateTime;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log::{info, warn};
use mongo_parquet_cli::StorageBackend;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::path::Path as OsPath;
use object_store::{ObjectStore, PutPayload};
use polars::io::HiveOptions;
use polars::prelude::*;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;

const DEFAULT_COMPRESSION_LEVEL: i32 = 7;

/// Remote object-store configuration, resolved from the environment.
pub struct RemoteStorageConfig {
    pub container: String,
    store: Arc<dyn ObjectStore>,
}

impl RemoteStorageConfig {
    pub fn new(backend: StorageBackend) -> Result<Self> {
        let container = env::var("DATA_BUCKET_NAME").unwrap_or_else(|_| "data".to_string());

        let store: Arc<dyn ObjectStore> = match backend {
            StorageBackend::Azure => {
                let (account, key) = azure_credentials()?;
                Arc::new(
                    MicrosoftAzureBuilder::new()
                        .with_account(account)
                        .with_access_key(key)
                        .with_container_name(&container)
                        .build()
                        .map_err(|e| eyre!("Failed to build Azure store: {}", e))?,
                )
            }
            StorageBackend::S3 => {
                let region =
                    env::var("AWS_DEFAULT_REGION").unwrap_or_else(|_| "ca-central-1".to_string());
                let mut builder = AmazonS3Builder::new()
                    .with_region(region)
                    .with_bucket_name(&container);
                if let (Ok(key_id), Ok(secret)) =
                    (env::var("AWS_ACCESS_KEY_ID"), env::var("AWS_SECRET_ACCESS_KEY"))
                {
                    builder = builder.with_access_key_id(key_id).with_secret_access_key(secret);
                }
                Arc::new(
                    builder
                        .build()
                        .map_err(|e| eyre!("Failed to build S3 store: {}", e))?,
                )
            }
        };

        Ok(RemoteStorageConfig { container, store })
    }
}

/// Account name + key, either directly from the environment or parsed out of
/// an `AZURE_DATA_CONNECTION_STRING` (`AccountName=...;AccountKey=...`).
fn azure_credentials() -> Result<(String, String)> {
    if let (Ok(account), Ok(key)) = (env::var("AZURE_STORAGE_ACCOUNT"), env::var("AZURE_STORAGE_KEY"))
    {
        return Ok((account, key));
    }
    let connection_string = env::var("AZURE_DATA_CONNECTION_STRING")
        .map_err(|_| eyre!("No Azure credentials: set AZURE_STORAGE_ACCOUNT/AZURE_STORAGE_KEY or AZURE_DATA_CONNECTION_STRING"))?;
    let mut account = None;
    let mut key = None;
    for part in connection_string.split(';') {
        // AccountKey is base64 and can contain '='; split_once keeps the rest intact
        if let Some((name, value)) = part.split_once('=') {
            match name {
                "AccountName" => account = Some(value.to_string()),
                "AccountKey" => key = Some(value.to_string()),
                _ => {}
            }
        }
    }
    match (account, key) {
        (Some(account), Some(key)) => Ok((account, key)),
        _ => Err(eyre!("AZURE_DATA_CONNECTION_STRING is missing AccountName or AccountKey")),
    }
}

/// Resolves local vs remote paths and moves Parquet bytes between them.
///
/// The remote side is resolved lazily: local-only actions never need
/// credentials, and a missing credential surfaces as a configuration error on
/// the first remote operation.
pub struct StorageClient {
    pub data_dir: PathBuf,
    pub sample_dir: PathBuf,
    remote: std::result::Result<RemoteStorageConfig, String>,
    runtime: Runtime,
}

impl StorageClient {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        sample_dir: impl Into<PathBuf>,
        backend: StorageBackend,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .wrap_err("Failed to start storage runtime")?;
        Ok(StorageClient {
            data_dir: data_dir.into(),
            sample_dir: sample_dir.into(),
            remote: RemoteStorageConfig::new(backend).map_err(|e| e.to_string()),
            runtime,
        })
    }

    fn remote(&self) -> Result<&RemoteStorageConfig> {
        self.remote.as_ref().map_err(|e| eyre!("{}", e))
    }

    /// The local data root for this run (sample or full).
    pub fn target_dirpath(&self, sample: bool) -> &Path {
        if sample {
            &self.sample_dir
        } else {
            &self.data_dir
        }
    }

    pub fn target_filepath(&self, filename: &str, sample: bool) -> PathBuf {
        self.target_dirpath(sample).join(filename)
    }

    /// The object-store key for a file, mirroring the local relative layout.
    fn remote_path(&self, filename: &str, sample: bool) -> OsPath {
        let prefix = self
            .target_dirpath(sample)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let key = format!("{}/{}", prefix, filename.replace('\\', "/"));
        OsPath::from(key.trim_matches('/'))
    }

    /// Lazily scan a Parquet file or hive-partitioned directory. With
    /// `remote`, the file is downloaded first. A `min_date` bound is pushed
    /// into the scan when the schema has a `date` column.
    pub fn scan_parquet(
        &self,
        filename: &str,
        sample: bool,
        remote: bool,
        hive_partitioning: bool,
        min_date: Option<NaiveDateTime>,
    ) -> Result<LazyFrame> {
        if remote {
            self.download_from_remote(&[filename.to_string()], sample)?;
        }

        let local_path = self.target_filepath(filename, sample);
        if !local_path.exists() {
            return Err(eyre!("Local file {} does not exist", local_path.display()));
        }

        let pl_path = PlPath::new(local_path.to_str().unwrap());
        let args = ScanArgsParquet {
            hive_options: HiveOptions {
                enabled: Some(hive_partitioning && local_path.is_dir()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut lf = LazyFrame::scan_parquet(pl_path, args)?;

        if let Some(min_date) = min_date {
            let schema = lf.collect_schema()?;
            if schema.contains("date") {
                lf = lf.filter(col("date").gt_eq(datetime_lit(min_date)));
            }
        }

        Ok(lf)
    }

    pub fn read_parquet(
        &self,
        filename: &str,
        sample: bool,
        remote: bool,
        hive_partitioning: bool,
        min_date: Option<NaiveDateTime>,
    ) -> Result<DataFrame> {
        self.scan_parquet(filename, sample, remote, hive_partitioning, min_date)?
            .collect()
            .map_err(Into::into)
    }

    /// Write a frame to `<root>/<filename>` with zstd compression, via a temp
    /// file and an atomic rename.
    pub fn write_parquet(&self, df: &mut DataFrame, filename: &str, sample: bool) -> Result<()> {
        self.write_parquet_with_level(df, filename, sample, DEFAULT_COMPRESSION_LEVEL)
    }

    pub fn write_parquet_with_level(
        &self,
        df: &mut DataFrame,
        filename: &str,
        sample: bool,
        compression_level: i32,
    ) -> Result<()> {
        let target = self.target_filepath(filename, sample);
        write_parquet_atomic(df, &target, compression_level)
    }

    /// Upload local `.parquet` files to the remote store, preserving relative
    /// paths. With `filepaths`, only those files are uploaded (incremental
    /// sync); otherwise the whole local root is walked.
    pub fn upload_to_remote(
        &self,
        filepaths: Option<&[PathBuf]>,
        sample: bool,
        cleanup_local: bool,
    ) -> Result<()> {
        let local_root = self.target_dirpath(sample).to_path_buf();
        if !local_root.exists() {
            return Err(eyre!("Local directory {} does not exist", local_root.display()));
        }

        let files = match filepaths {
            Some(paths) => paths.to_vec(),
            None => walk_parquet_files(&local_root)?,
        };

        info!("Uploading {} Parquet files to remote storage", files.len());

        for local_path in files {
            let relative = local_path
                .strip_prefix(&local_root)
                .wrap_err_with(|| format!("{} is outside the data root", local_path.display()))?;
            let remote_path = self.remote_path(&relative.to_string_lossy(), sample);

            info!("Uploading {} -> {}", local_path.display(), remote_path);
            let bytes = fs::read(&local_path)?;
            self.runtime
                .block_on(self.remote()?.store.put(&remote_path, PutPayload::from(bytes)))
                .map_err(|e| eyre!("Upload of {} failed: {}", remote_path, e))?;

            if cleanup_local {
                info!("Deleting local file {}", local_path.display());
                fs::remove_file(&local_path)?;
            }
        }
        Ok(())
    }

    /// Download files (or partitioned directories) from the remote store into
    /// the local root. Missing remote objects log a warning and are skipped.
    pub fn download_from_remote(&self, filenames: &[String], sample: bool) -> Result<()> {
        for filename in filenames {
            let remote_path = self.remote_path(filename, sample);
            let local_path = self.target_filepath(filename, sample);

            if self.remote_exists(&remote_path)? {
                info!("Downloading {} -> {}", remote_path, local_path.display());
                self.fetch_object(&remote_path, &local_path)?;
                continue;
            }

            // A partitioned file is a directory of 0.parquet leaves remotely.
            let children = self.walk_remote_parquet(&remote_path)?;
            if children.is_empty() {
                warn!("Remote file {} does not exist", remote_path);
                continue;
            }
            for child in children {
                let relative = child
                    .as_ref()
                    .strip_prefix(remote_path.as_ref())
                    .map(|s| s.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| child.filename().unwrap_or_default().to_string());
                let target = local_path.join(&relative);
                info!("Downloading {} -> {}", child, target.display());
                self.fetch_object(&child, &target)?;
            }
        }
        Ok(())
    }

    fn remote_exists(&self, path: &OsPath) -> Result<bool> {
        match self.runtime.block_on(self.remote()?.store.head(path)) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(eyre!("Remote head of {} failed: {}", path, e)),
        }
    }

    fn fetch_object(&self, remote: &OsPath, local: &Path) -> Result<()> {
        let store = Arc::clone(&self.remote()?.store);
        let bytes = self
            .runtime
            .block_on(async move { store.get(remote).await?.bytes().await })
            .map_err(|e| eyre!("Download of {} failed: {}", remote, e))?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(local, bytes)?;
        Ok(())
    }

    /// Every `.parquet` object below a remote prefix, via delimited listing.
    fn walk_remote_parquet(&self, prefix: &OsPath) -> Result<Vec<OsPath>> {
        let mut found = Vec::new();
        let mut prefixes = vec![prefix.clone()];
        while let Some(current) = prefixes.pop() {
            let listing = self
                .runtime
                .block_on(self.remote()?.store.list_with_delimiter(Some(&current)))
                .map_err(|e| eyre!("Remote list of {} failed: {}", current, e))?;
            for object in listing.objects {
                if object.location.as_ref().ends_with(".parquet") {
                    found.push(object.location);
                }
            }
            prefixes.extend(listing.common_prefixes);
        }
        found.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
        Ok(found)
    }
}

/// Write a frame to `target` through a `.tmp.parquet` sibling. The temp file
/// is fully flushed before the rename; on error the temp file is removed and
/// the target left untouched.
pub fn write_parquet_atomic(df: &mut DataFrame, target: &Path, compression_level: i32) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(target);
    let result = (|| -> Result<()> {
        let file = fs::File::create(&tmp)?;
        ParquetWriter::new(file)
            .with_compression(ParquetCompression::Zstd(Some(
                ZstdLevel::try_new(compression_level).map_err(|e| eyre!("Bad zstd level: {}", e))?,
            )))
            .finish(df)?;
        Ok(())
    })();

    match result {
        Ok(()) => promote(&tmp, target),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Collect a lazy frame on the streaming engine, so large concatenations
/// never materialize twice.
pub fn collect_lazy(lf: LazyFrame) -> Result<DataFrame> {
    lf.with_new_streaming(true).collect().map_err(Into::into)
}

/// Millisecond-datetime literal for filter pushdown.
pub fn datetime_lit(dt: NaiveDateTime) -> Expr {
    lit(dt.and_utc().timestamp_millis()).cast(DataType::Datetime(TimeUnit::Milliseconds, None))
}

/// Every `.parquet` file under a local directory tree, sorted.
pub fn walk_parquet_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "parquet") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_finds_nested_parquet_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("metrics.parquet/year=2024/month=1")).unwrap();
        fs::write(root.join("metrics.parquet/year=2024/month=1/0.parquet"), b"x").unwrap();
        fs::write(root.join("notes.txt"), b"y").unwrap();
        fs::write(root.join("pages.parquet"), b"z").unwrap();

        let files = walk_parquet_files(root).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.extension().unwrap() == "parquet"));
    }

    #[test]
    fn atomic_write_round_trips_a_frame() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out/frame.parquet");
        let mut df = df!("a" => [1i32, 2, 3], "b" => ["x", "y", "z"]).unwrap();
        write_parquet_atomic(&mut df, &target, 7).unwrap();
        assert!(target.exists());
        assert!(!tmp_path(&target).exists());

        let pl_path = PlPath::try_from_path(&target).unwrap();
        let back = LazyFrame::scan_parquet(pl_path, Default::default())
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(back.height(), 3);
    }
}
