//! Derived-view builder: denormalized pages and tasks artifacts per preset
//! date range, written to temp Parquet and streamed into view collections.

use crate::mongo::MongoDb;
use color_eyre::Result;
use std::path::Path;

pub mod daterange;
pub mod metrics_common;
pub mod pages;
pub mod tasks;
pub mod utils;

pub use daterange::{
    date_ranges_min_max, date_ranges_with_comparisons, DateRange, DateRangeType,
    DateRangeWithComparison,
};
pub use pages::PagesViewService;
pub use tasks::TasksViewService;
pub use utils::ViewsUtils;

/// Orchestrates both view rebuilds over a shared temp directory. The tasks
/// view reads the pages view's temp files, so pages must be recalculated
/// first within a run.
pub struct ViewService<'a> {
    db: &'a MongoDb,
    utils: ViewsUtils,
}

impl<'a> ViewService<'a> {
    pub fn new(db: &'a MongoDb, parquet_dir_path: &Path, temp_dir_name: &str) -> Self {
        ViewService {
            db,
            utils: ViewsUtils::new(parquet_dir_path, temp_dir_name),
        }
    }

    pub fn recalculate_pages_view(&self) -> Result<()> {
        self.utils.ensure_temp_dir()?;
        PagesViewService::new(self.db, &self.utils).recalculate()
    }

    pub fn recalculate_tasks_view(&self) -> Result<()> {
        self.utils.ensure_temp_dir()?;
        TasksViewService::new(self.db, &self.utils).recalculate()
    }

    pub fn cleanup_temp_dir(&self) {
        self.utils.cleanup_temp_dir();
    }
}
