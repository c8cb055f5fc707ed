//! Top-level action routing: export, import, upload, download, sync,
//! view recalculation.

use crate::io::{MongoParquetIO, DEFAULT_BATCH_SIZE};
use crate::mongo::{MongoConfig, MongoDb};
use crate::sampling::SamplingContext;
use crate::schemas::{
    collection_models, MongoCollection, SyncType, METRICS_SENTINEL_COLLECTION,
};
use crate::storage::StorageClient;
use crate::sync::SyncUtils;
use crate::views::ViewService;
use chrono::NaiveDateTime;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use log::{error, info};
use serde_json::json;

/// Collection include/exclude selection. Include and exclude are mutually
/// exclusive; both empty means everything.
#[derive(Clone, Debug, Default)]
pub struct CollectionFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl CollectionFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Self> {
        if !include.is_empty() && !exclude.is_empty() {
            return Err(eyre!(
                "Cannot specify both include and exclude lists. Use one or the other."
            ));
        }
        Ok(CollectionFilter { include, exclude })
    }

    fn selects(&self, collection: &str) -> bool {
        if !self.include.is_empty() {
            return self.include.iter().any(|c| c == collection);
        }
        !self.exclude.iter().any(|c| c == collection)
    }
}

/// The engine facade: owns the adapters, the sampling context and the model
/// registry, and routes top-level actions.
pub struct MongoParquet {
    pub config: MongoConfig,
    pub storage: StorageClient,
    pub db: MongoDb,
    pub sampling: SamplingContext,
    pub sample: bool,
    models: Vec<MongoCollection>,
}

impl MongoParquet {
    pub fn new(config: MongoConfig, storage: StorageClient, db: MongoDb, sample: bool) -> Self {
        let models = collection_models(storage.target_dirpath(sample));
        MongoParquet {
            config,
            storage,
            db,
            sampling: SamplingContext::new(),
            sample,
            models,
        }
    }

    /// Seed the sampling context. Call once, before any sampled action.
    pub fn setup_sampling_context(&mut self, f: impl FnOnce(&mut SamplingContext)) {
        self.sampling.update_context(f);
    }

    fn io(&self) -> MongoParquetIO<'_> {
        MongoParquetIO::new(&self.db, &self.storage, &self.sampling)
    }

    fn selected<'a>(&'a self, filter: &CollectionFilter) -> impl Iterator<Item = &'a MongoCollection> + 'a {
        self.models.iter().filter_map(move |model| {
            if filter.selects(model.collection) {
                Some(model)
            } else {
                info!("Skipping {} (filtered out)", model.collection);
                None
            }
        })
    }

    /// Cheap non-emptiness check before exporting a collection.
    fn should_export(&self, collection: &MongoCollection) -> Result<bool> {
        Ok(self.db.driver.estimated_document_count(collection.collection)? > 0)
    }

    pub fn export_from_mongo(&self, filter: &CollectionFilter) -> Result<()> {
        let io = self.io();
        for collection in self.selected(filter) {
            if !self.should_export(collection)? {
                info!("Collection {} has no data, skipping export", collection.collection);
                continue;
            }
            if let Err(e) = io.export_to_parquet(collection, self.sample) {
                error!("Export of {} failed: {:?}", collection.collection, e);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn import_to_mongo(
        &self,
        filter: &CollectionFilter,
        remote: bool,
        min_date: Option<NaiveDateTime>,
        drop_first: bool,
    ) -> Result<()> {
        let io = self.io();
        let mut failures = 0usize;
        for collection in self.selected(filter) {
            if drop_first {
                let deleted = self.db.driver.delete_many(collection.collection, &json!({}))?;
                if deleted > 0 {
                    info!("Dropped {} documents from {}", deleted, collection.collection);
                }
            }
            // A failed collection doesn't stop the rest; inputs are intact
            // and the collection can be retried with --include.
            if let Err(e) = io.import_from_parquet(
                collection,
                self.sample,
                remote,
                min_date,
                Some(DEFAULT_BATCH_SIZE),
            ) {
                error!("Import of {} failed: {:?}", collection.collection, e);
                failures += 1;
            }
        }
        if failures > 0 {
            return Err(eyre!("{} collection imports failed", failures));
        }
        Ok(())
    }

    pub fn upload_to_remote(&self, cleanup_local: bool) -> Result<()> {
        self.storage.upload_to_remote(None, self.sample, cleanup_local)
    }

    pub fn download_from_remote(&self, filter: &CollectionFilter) -> Result<()> {
        let filenames: Vec<String> = self
            .selected(filter)
            .flat_map(|collection| collection.models())
            .map(|model| model.parquet_filename.to_string())
            .collect();
        self.storage.download_from_remote(&filenames, self.sample)
    }

    /// Refuse to sync against an empty database; overwriting good Parquet
    /// with a vacuum is unrecoverable without the remote copies.
    pub fn bail_if_empty(&self) -> Result<()> {
        if self
            .db
            .driver
            .estimated_document_count(METRICS_SENTINEL_COLLECTION)?
            == 0
        {
            return Err(eyre!("MongoDB database is empty."));
        }
        Ok(())
    }

    /// Sync Parquet with the database: full re-exports for `simple`
    /// collections, watermark appends for `incremental` ones, with a single
    /// batched upload of changed files at the end.
    pub fn sync_parquet_with_mongo(
        &self,
        filter: &CollectionFilter,
        upload_on_success: bool,
        cleanup_temp_dir: bool,
    ) -> Result<()> {
        self.bail_if_empty()?;

        let root_dir = self.storage.target_dirpath(self.sample).to_path_buf();
        let mut sync_utils = SyncUtils::new(root_dir);
        let io = self.io();

        for collection in self.selected(filter) {
            if !self.should_export(collection)? {
                info!("Collection {} has no data, skipping export", collection.collection);
                continue;
            }

            match collection.sync_type {
                SyncType::Simple => {
                    info!("Performing simple sync for {}", collection.collection);
                    for model in collection.models() {
                        sync_utils.snapshot_hashes(&model.target_path())?;
                    }
                    io.export_to_parquet(collection, self.sample)?;
                    if upload_on_success {
                        for model in collection.models() {
                            sync_utils.queue_upload_if_changed(&model.target_path())?;
                        }
                    }
                }
                SyncType::Incremental => {
                    if let Err(e) =
                        io.sync_incremental_parquet(collection, &mut sync_utils, self.sample)
                    {
                        error!("Error occurred while syncing {}: {:?}", collection.collection, e);
                    }
                }
            }
        }

        if upload_on_success && !sync_utils.upload_queue.is_empty() {
            info!("Uploading {} updated files...", sync_utils.upload_queue.len());
            self.storage
                .upload_to_remote(Some(&sync_utils.upload_queue), self.sample, false)?;
        } else if upload_on_success {
            info!("No files changed; nothing to upload");
        }
        sync_utils.upload_queue.clear();

        if cleanup_temp_dir {
            sync_utils.cleanup_temp_dir();
        }
        Ok(())
    }

    /// Rebuild the derived pages/tasks views.
    pub fn recalculate_views(&self, cleanup_temp_dir: bool) -> Result<()> {
        let view_service = ViewService::new(
            &self.db,
            self.storage.target_dirpath(self.sample),
            ".views_temp",
        );
        view_service.recalculate_pages_view()?;
        view_service.recalculate_tasks_view()?;

        if cleanup_temp_dir {
            view_service.cleanup_temp_dir();
        }
        Ok(())
    }

    pub fn collections(&self) -> &[MongoCollection] {
        &self.models
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_and_exclude_are_mutually_exclusive() {
        assert!(CollectionFilter::new(vec!["a".into()], vec!["b".into()]).is_err());
        assert!(CollectionFilter::new(vec!["a".into()], vec![]).is_ok());
        assert!(CollectionFilter::new(vec![], vec![]).is_ok());
    }

    #[test]
    fn filter_selection() {
        let all = CollectionFilter::default();
        assert!(all.selects("pages"));

        let include = CollectionFilter::new(vec!["pages".into()], vec![]).unwrap();
        assert!(include.selects("pages"));
        assert!(!include.selects("tasks"));

        let exclude = CollectionFilter::new(vec![], vec!["pages".into()]).unwrap();
        assert!(!exclude.selects("pages"));
        assert!(exclude.selects("tasks"));
    }
}
