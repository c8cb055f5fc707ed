//! Temp-file plumbing for view builds.

use crate::storage::{collect_lazy, write_parquet_atomic};
use color_eyre::Result;
use log::warn;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// View sinks trade a little size for speed.
const VIEWS_COMPRESSION_LEVEL: i32 = 5;

/// Paths for view computation: the parquet data root and a sibling temp
/// directory holding per-date-range intermediate files.
pub struct ViewsUtils {
    pub parquet_dir_path: PathBuf,
    pub temp_dir_path: PathBuf,
}

impl ViewsUtils {
    pub fn new(parquet_dir_path: &Path, temp_dir_name: &str) -> Self {
        let parent = parquet_dir_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        ViewsUtils {
            parquet_dir_path: parquet_dir_path.to_path_buf(),
            temp_dir_path: parent.join(temp_dir_name),
        }
    }

    pub fn ensure_temp_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.temp_dir_path)?;
        Ok(())
    }

    pub fn cleanup_temp_dir(&self) {
        if self.temp_dir_path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.temp_dir_path) {
                warn!(
                    "Failed to delete temp views directory {}: {}",
                    self.temp_dir_path.display(),
                    e
                );
            }
        }
    }

    pub fn scan_temp(&self, file_name: &str) -> Result<LazyFrame> {
        let path = self.temp_dir_path.join(file_name);
        let pl_path = PlPath::new(path.to_str().unwrap());
        LazyFrame::scan_parquet(pl_path, Default::default()).map_err(Into::into)
    }

    /// Materialize a lazy view computation into the temp directory.
    pub fn sink_temp(&self, lf: LazyFrame, file_name: &str) -> Result<()> {
        self.ensure_temp_dir()?;
        let path = self.temp_dir_path.join(file_name);
        let mut df = collect_lazy(lf)?;
        write_parquet_atomic(&mut df, &path, VIEWS_COMPRESSION_LEVEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dir_is_a_sibling_of_the_data_root() {
        let utils = ViewsUtils::new(Path::new("/srv/app/data"), ".views_temp");
        assert_eq!(utils.temp_dir_path, Path::new("/srv/app/.views_temp"));
    }

    #[test]
    fn sink_and_scan_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let data_root = dir.path().join("data");
        fs::create_dir_all(&data_root).unwrap();
        let utils = ViewsUtils::new(&data_root, ".views_temp");

        let df = df!("a" => [1i64, 2, 3]).unwrap();
        utils.sink_temp(df.lazy(), "view_test.parquet").unwrap();

        let back = utils.scan_temp("view_test.parquet").unwrap().collect().unwrap();
        assert_eq!(back.height(), 3);
    }
}
