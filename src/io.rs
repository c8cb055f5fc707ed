//! The import/export/sync engine: partitioned, batched, streaming I/O
//! between the database and the Parquet store.

use crate::filter::{date_bounds, date_value, with_date_range, without_date_key};
use crate::mongo::MongoDb;
use crate::sampling::SamplingContext;
use crate::schemas::{MongoCollection, ParquetModel, PartitionBy};
use crate::storage::{collect_lazy, write_parquet_atomic, StorageClient};
use crate::sync::SyncUtils;
use crate::utils::{format_duration, month_range, year_range};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log::{error, info, warn};
use polars::prelude::*;
use serde_json::{json, Value as Json};
use std::path::Path;
use std::time::{Duration, Instant};

/// Partition file name used by partitioned writes.
const PARTITION_FILENAME: &str = "0.parquet";

/// Pause between partition queries so back-to-back range scans don't
/// saturate the database.
const PARTITION_DELAY: Duration = Duration::from_millis(300);

/// Default row count per insert batch.
pub const DEFAULT_BATCH_SIZE: usize = 50_000;

/// Compression level for primary data files.
const DATA_COMPRESSION_LEVEL: i32 = 7;

pub struct MongoParquetIO<'a> {
    pub db: &'a MongoDb,
    pub storage: &'a StorageClient,
    pub sampling: &'a SamplingContext,
}

impl<'a> MongoParquetIO<'a> {
    pub fn new(db: &'a MongoDb, storage: &'a StorageClient, sampling: &'a SamplingContext) -> Self {
        MongoParquetIO { db, storage, sampling }
    }

    fn effective_filter(&self, model: &ParquetModel, sample: bool) -> Result<Option<Json>> {
        if sample {
            model.get_sampling_filter(self.sampling)
        } else {
            Ok(model.filter.clone())
        }
    }

    /// Export every file of a collection. Partitioned models go through
    /// [`Self::export_partitioned`] unless sampling (samples are small enough
    /// for single files).
    pub fn export_to_parquet(&self, collection: &MongoCollection, sample: bool) -> Result<()> {
        info!("Exporting {} to Parquet...", collection.collection);

        if self.db.driver.list_collections()?.is_empty() {
            return Err(eyre!(
                "Collection {} does not exist in the database",
                collection.collection
            ));
        }

        for model in collection.models() {
            if !sample && model.partition_by.is_some() {
                self.export_partitioned(model, sample)?;
                continue;
            }

            info!("Exporting {}...", model.parquet_filename);
            let filter = self.effective_filter(model, sample)?;
            let mut df = self.db.find(model, filter.as_ref())?;
            self.storage
                .write_parquet_with_level(&mut df, model.parquet_filename, sample, DATA_COMPRESSION_LEVEL)?;
        }
        Ok(())
    }

    /// Export one model month-by-month (or year-by-year) into a hive layout:
    /// `<filename>/year=YYYY[/month=M]/0.parquet`.
    pub fn export_partitioned(&self, model: &ParquetModel, sample: bool) -> Result<()> {
        info!("Exporting {} to partitioned Parquet...", model.collection);

        let partition_by = model
            .partition_by
            .ok_or_else(|| eyre!("{} has no partition key", model.parquet_filename))?;

        let filter = self.effective_filter(model, sample)?;
        let (filter_start, filter_end) = date_bounds(filter.as_ref());
        let start = filter_start.unwrap_or_else(default_export_start);
        let end = filter_end.unwrap_or_else(|| Utc::now().naive_utc());

        let windows = match partition_by {
            PartitionBy::Month => month_range(start, end),
            PartitionBy::Year => year_range(start, end),
        };

        for (window_start, window_end) in windows {
            info!(
                "Processing {} - {}",
                window_start.date(),
                window_end.date()
            );
            let started = Instant::now();

            let window_filter = with_date_range(filter.as_ref(), window_start, window_end);
            let df = self.db.find(model, Some(&window_filter))?;

            if df.height() == 0 {
                info!("No data found for {}, skipping...", window_start.date());
                continue;
            }
            info!("Found {} records", df.height());

            let filepath = format!(
                "{}/{}/{}",
                model.parquet_filename,
                partition_by.partition_dir(window_start),
                PARTITION_FILENAME
            );
            info!("Writing to {}", filepath);
            let mut df = df;
            self.storage
                .write_parquet_with_level(&mut df, &filepath, sample, DATA_COMPRESSION_LEVEL)?;

            info!("Done in {}", format_duration(started.elapsed()));
            std::thread::sleep(PARTITION_DELAY);
        }
        Ok(())
    }

    /// Append rows newer than the primary file's date watermark, atomically
    /// per partition, queueing changed files for upload.
    pub fn sync_incremental_parquet(
        &self,
        collection: &MongoCollection,
        sync_utils: &mut SyncUtils,
        sample: bool,
    ) -> Result<()> {
        if !collection.primary.schema.contains("date") {
            return Err(eyre!(
                "{} is configured for incremental sync but has no date column",
                collection.collection
            ));
        }

        let last_parquet_date = collection
            .primary
            .latest_date()
            .wrap_err_with(|| format!("Missing source file for {}", collection.collection))?
            .ok_or_else(|| eyre!("{} has no rows to anchor a sync", collection.collection))?;

        let base_filter = self.effective_filter(&collection.primary, sample)?;
        let db_max = self
            .db
            .max_date(&collection.primary, without_date_key(base_filter.as_ref()).as_ref())?;

        let db_max = match db_max {
            Some(db_max) if db_max > last_parquet_date => db_max,
            _ => {
                info!(
                    "{} is up to date (parquet max {})",
                    collection.collection, last_parquet_date
                );
                return Ok(());
            }
        };

        info!(
            "Syncing {}: {} -> {}",
            collection.collection, last_parquet_date, db_max
        );
        sync_utils.ensure_temp_dirs()?;

        for model in collection.models() {
            let target = model.target_path();
            sync_utils.snapshot_hashes(&target)?;

            let model_filter = self.effective_filter(model, sample)?;
            let base = without_date_key(model_filter.as_ref());

            match model.partition_by {
                Some(partition_by) => {
                    self.sync_partitioned_model(
                        model,
                        partition_by,
                        base.as_ref(),
                        last_parquet_date,
                        db_max,
                        sync_utils,
                    )?;
                }
                None => {
                    let filter = incremental_filter(base.as_ref(), last_parquet_date, None);
                    let new_rows = self.db.find(model, Some(&filter))?;
                    if new_rows.height() == 0 {
                        continue;
                    }
                    if target.exists() {
                        self.append_to_file(&target, new_rows, sync_utils)?;
                    } else {
                        let mut new_rows = new_rows;
                        write_parquet_atomic(&mut new_rows, &target, DATA_COMPRESSION_LEVEL)?;
                    }
                    sync_utils.queue_upload_if_changed(&target)?;
                }
            }
        }
        Ok(())
    }

    fn sync_partitioned_model(
        &self,
        model: &ParquetModel,
        partition_by: PartitionBy,
        base_filter: Option<&Json>,
        last_parquet_date: NaiveDateTime,
        db_max: NaiveDateTime,
        sync_utils: &mut SyncUtils,
    ) -> Result<()> {
        let from = last_parquet_date + ChronoDuration::days(1);
        let windows = match partition_by {
            PartitionBy::Month => month_range(from, db_max),
            PartitionBy::Year => year_range(from, db_max),
        };

        for (window_start, window_end) in windows {
            // The first window can straddle the watermark; keep the strict
            // bound there. Later windows start after it.
            let filter = if window_start <= last_parquet_date {
                incremental_filter(base_filter, last_parquet_date, Some(window_end))
            } else {
                with_date_range(base_filter, window_start, window_end)
            };

            let new_rows = self.db.find(model, Some(&filter))?;
            if new_rows.height() == 0 {
                continue;
            }
            info!(
                "{}: {} new rows for {}",
                model.parquet_filename,
                new_rows.height(),
                partition_by.partition_dir(window_start)
            );

            let partition_path = model
                .target_path()
                .join(partition_by.partition_dir(window_start))
                .join(PARTITION_FILENAME);

            if partition_path.exists() {
                self.append_to_file(&partition_path, new_rows, sync_utils)?;
            } else {
                let mut new_rows = new_rows;
                write_parquet_atomic(&mut new_rows, &partition_path, DATA_COMPRESSION_LEVEL)?;
            }
            sync_utils.queue_upload_if_changed(&partition_path)?;
        }
        Ok(())
    }

    /// Backup, concat existing ∪ new into a temp file, atomically rename.
    /// On failure the original is restored from backup.
    fn append_to_file(
        &self,
        target: &Path,
        new_rows: DataFrame,
        sync_utils: &SyncUtils,
    ) -> Result<()> {
        sync_utils.backup_file(target)?;

        let result = (|| -> Result<()> {
            let pl_path = PlPath::new(target.to_str().unwrap());
            let existing = LazyFrame::scan_parquet(pl_path, Default::default())?;
            let combined = concat(
                [existing, new_rows.lazy()],
                UnionArgs::default(),
            )?;
            let mut combined = collect_lazy(combined)?;
            write_parquet_atomic(&mut combined, target, DATA_COMPRESSION_LEVEL)
        })();

        if let Err(e) = result {
            error!(
                "Incremental append to {} failed, restoring backup: {:?}",
                target.display(),
                e
            );
            sync_utils
                .restore_file(target)
                .wrap_err("Backup restore after failed append")?;
            return Err(e);
        }
        Ok(())
    }

    /// Import a collection from Parquet into the database.
    pub fn import_from_parquet(
        &self,
        collection: &MongoCollection,
        sample: bool,
        remote: bool,
        min_date: Option<NaiveDateTime>,
        batch_size: Option<usize>,
    ) -> Result<()> {
        let started = Instant::now();

        if !sample && collection.primary.partition_by.is_some() {
            self.import_from_parquet_partitioned(collection, sample, remote, min_date, batch_size)?;
            info!("Import completed in {}", format_duration(started.elapsed()));
            return Ok(());
        }

        info!("Importing {} from Parquet...", collection.collection);

        let primary = match self.scan_model(&collection.primary, sample, remote, false, min_date)? {
            Some(lf) => (collection.primary.reverse_transform)(lf),
            None => {
                warn!(
                    "No data found for primary model {}, skipping...",
                    collection.primary.parquet_filename
                );
                return Ok(());
            }
        };

        let mut secondaries = Vec::new();
        for model in &collection.secondaries {
            if let Some(lf) = self.scan_model(model, sample, remote, false, min_date)? {
                secondaries.push((model.reverse_transform)(lf));
            }
        }

        self.db.ensure_collection(collection.collection)?;
        let inserted = self.insert_in_batches(collection, primary, secondaries, batch_size)?;

        info!(
            "Inserted {} records into {} in {}",
            inserted,
            collection.collection,
            format_duration(started.elapsed())
        );
        Ok(())
    }

    /// Partition-aware import: enumerate `(year[, month])` tuples from the
    /// primary scan and stream each partition through the batch inserter.
    fn import_from_parquet_partitioned(
        &self,
        collection: &MongoCollection,
        sample: bool,
        remote: bool,
        min_date: Option<NaiveDateTime>,
        batch_size: Option<usize>,
    ) -> Result<()> {
        info!("Importing {} from partitioned Parquet...", collection.collection);

        let partition_by = collection
            .primary
            .partition_by
            .ok_or_else(|| eyre!("Tried a partitioned import without a partition key"))?;
        let partition_cols = partition_by.partition_columns();

        let primary_lf = self
            .scan_model(&collection.primary, sample, remote, true, min_date)?
            .ok_or_else(|| {
                eyre!("No data found in {}", collection.primary.parquet_filename)
            })?;

        let schema_names = primary_lf.clone().collect_schema()?;
        for column in partition_cols {
            if !schema_names.contains(column) {
                return Err(eyre!(
                    "Partition column {} not found in {}",
                    column,
                    collection.primary.parquet_filename
                ));
            }
        }

        let partitions = partition_tuples(primary_lf.clone(), partition_cols)?;
        if partitions.is_empty() {
            info!("No data found in {}, skipping...", collection.primary.parquet_filename);
            return Ok(());
        }
        info!("Found {} partitions to process", partitions.len());

        let mut secondary_lfs = Vec::new();
        for model in &collection.secondaries {
            if let Some(lf) = self.scan_model(model, sample, remote, true, min_date)? {
                secondary_lfs.push((model, lf));
            }
        }

        self.db.ensure_collection(collection.collection)?;

        for (year, month) in partitions {
            let started = Instant::now();
            let label = match month {
                Some(month) => format!("{}-{}", year, month),
                None => year.to_string(),
            };
            info!("Processing partition {}", label);

            let partition_filter = move |lf: LazyFrame| -> LazyFrame {
                let mut lf = lf.filter(col("year").cast(DataType::Int32).eq(lit(year)));
                if let Some(month) = month {
                    lf = lf.filter(col("month").cast(DataType::Int32).eq(lit(month)));
                }
                lf.drop(by_name(partition_cols.to_vec(), true))
            };

            let primary = (collection.primary.reverse_transform)(partition_filter(
                primary_lf.clone(),
            ));
            let secondaries: Vec<LazyFrame> = secondary_lfs
                .iter()
                .map(|(model, lf)| (model.reverse_transform)(partition_filter(lf.clone())))
                .collect();

            let inserted = self.insert_in_batches(collection, primary, secondaries, batch_size)?;
            info!(
                "Inserted {} records into {} for partition {} in {}",
                inserted,
                collection.collection,
                label,
                format_duration(started.elapsed())
            );
        }
        Ok(())
    }

    /// Stream the primary through `[offset, offset+batch)` slices, join the
    /// secondaries on `_id`, and insert batch by batch. `None` batch size
    /// means a single batch.
    pub fn insert_in_batches(
        &self,
        collection: &MongoCollection,
        primary: LazyFrame,
        secondaries: Vec<LazyFrame>,
        batch_size: Option<usize>,
    ) -> Result<usize> {
        let primary = primary.sort(["_id"], SortMultipleOptions::default());

        // None means everything in one batch.
        let batch_size = match batch_size {
            Some(batch_size) => batch_size,
            None => {
                let df = collect_lazy(collection.assemble(primary, secondaries))?;
                if df.height() == 0 {
                    return Ok(0);
                }
                return self.db.insert_many(collection, &df, true, false);
            }
        };

        let mut offset: i64 = 0;
        let mut total = 0usize;
        loop {
            let batch = primary.clone().slice(offset, batch_size as IdxSize);
            let assembled = collection.assemble(batch, secondaries.clone());
            let df = collect_lazy(assembled)?;
            if df.height() == 0 {
                break;
            }

            total += self.db.insert_many(collection, &df, true, false)?;
            if df.height() < batch_size {
                break;
            }
            offset += batch_size as i64;
        }
        Ok(total)
    }

    /// Scan one model's file, returning None when the file is missing or
    /// empty (callers skip those).
    fn scan_model(
        &self,
        model: &ParquetModel,
        sample: bool,
        remote: bool,
        hive: bool,
        min_date: Option<NaiveDateTime>,
    ) -> Result<Option<LazyFrame>> {
        let hive = hive && model.partition_by.is_some() && !sample;
        match self
            .storage
            .scan_parquet(model.parquet_filename, sample, remote, hive, min_date)
        {
            Ok(lf) => Ok(Some(lf)),
            Err(e) => {
                warn!("No data found in {} ({}), skipping...", model.parquet_filename, e);
                Ok(None)
            }
        }
    }
}

/// `{date: {$gt: watermark[, $lte: upper]}}` merged over a base filter.
fn incremental_filter(
    base: Option<&Json>,
    after: NaiveDateTime,
    upper: Option<NaiveDateTime>,
) -> Json {
    let mut bounds = serde_json::Map::new();
    bounds.insert("$gt".to_string(), date_value(after));
    if let Some(upper) = upper {
        bounds.insert("$lte".to_string(), date_value(upper));
    }
    crate::filter::merge(base, json!({ "date": Json::Object(bounds) }))
}

fn default_export_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap_or_default()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
}

/// Distinct `(year, Option<month>)` tuples in ascending order.
fn partition_tuples(lf: LazyFrame, partition_cols: &[&str]) -> Result<Vec<(i32, Option<i32>)>> {
    let columns: Vec<Expr> = partition_cols
        .iter()
        .map(|name| col(*name).cast(DataType::Int32))
        .collect();
    let df = lf
        .select(columns)
        .unique(None, UniqueKeepStrategy::Any)
        .sort(partition_cols.to_vec(), SortMultipleOptions::default())
        .collect()?;

    let years = df.column("year")?.i32()?;
    let months = if partition_cols.contains(&"month") {
        Some(df.column("month")?.i32()?)
    } else {
        None
    };

    let mut tuples = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let year = years.get(i).ok_or_else(|| eyre!("Null partition year"))?;
        let month = months.and_then(|m| m.get(i));
        tuples.push((year, month));
    }
    Ok(tuples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_filter_keeps_base_and_bounds() {
        let base = json!({ "tasks": { "$exists": true } });
        let after = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let upper = NaiveDate::from_ymd_opt(2024, 3, 31)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();

        let filter = incremental_filter(Some(&base), after, Some(upper));
        assert!(filter["tasks"].is_object());
        assert!(filter["date"]["$gt"].is_object());
        assert!(filter["date"]["$lte"].is_object());

        let open_ended = incremental_filter(None, after, None);
        assert!(open_ended["date"]["$gt"].is_object());
        assert!(open_ended["date"].get("$lte").is_none());
    }

    #[test]
    fn default_export_window_starts_in_2020() {
        assert_eq!(
            default_export_start().date(),
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
        );
    }
}
