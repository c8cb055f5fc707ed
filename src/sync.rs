//! Incremental-sync bookkeeping: temp/backup directories, per-file content
//! hashes, atomic file promotion and the end-of-run upload queue.

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log::warn;
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Per-run sync state rooted next to the data directory.
///
/// Layout: `<data-root>/../.sync_temp/{backup,incremental}/...`. The backup
/// directory mirrors relative paths under the data root so restores are
/// unambiguous; the incremental directory holds in-flight concat output.
pub struct SyncUtils {
    root_dir: PathBuf,
    temp_dir: PathBuf,
    hashes: HashMap<PathBuf, Option<String>>,
    pub upload_queue: Vec<PathBuf>,
}

impl SyncUtils {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        let root_dir = root_dir.into();
        let parent = root_dir.parent().map(Path::to_path_buf).unwrap_or_default();
        SyncUtils {
            root_dir,
            temp_dir: parent.join(".sync_temp"),
            hashes: HashMap::new(),
            upload_queue: Vec::new(),
        }
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.temp_dir.join("backup")
    }

    pub fn incremental_dir(&self) -> PathBuf {
        self.temp_dir.join("incremental")
    }

    pub fn ensure_temp_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.backup_dir())?;
        fs::create_dir_all(self.incremental_dir())?;
        Ok(())
    }

    /// Remove the whole temp tree. Failures are logged, not fatal.
    pub fn cleanup_temp_dir(&self) {
        if self.temp_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.temp_dir) {
                warn!(
                    "Failed to delete temp sync directory {}: {}",
                    self.temp_dir.display(),
                    e
                );
            }
        }
    }

    /// MD5 of a file's contents, streamed.
    pub fn file_md5(path: &Path) -> Result<String> {
        let mut file = fs::File::open(path)
            .wrap_err_with(|| format!("Failed to open {} for hashing", path.display()))?;
        let mut hasher = Md5::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Record the current hash of `path` (and of every `.parquet` below it
    /// when it is a partitioned directory) so later changes can be detected.
    pub fn snapshot_hashes(&mut self, path: &Path) -> Result<()> {
        for file in parquet_files_under(path)? {
            let hash = Self::file_md5(&file)?;
            self.hashes.insert(file, Some(hash));
        }
        if !path.exists() {
            self.hashes.insert(path.to_path_buf(), None);
        }
        Ok(())
    }

    /// Queue `path` for upload iff its content differs from the snapshot
    /// (a previously unseen file always counts as changed).
    pub fn queue_upload_if_changed(&mut self, path: &Path) -> Result<bool> {
        let mut any_changed = false;
        for file in parquet_files_under(path)? {
            let current = Self::file_md5(&file)?;
            let previous = self.hashes.get(&file).cloned().flatten();
            if previous.as_deref() != Some(current.as_str()) {
                if !self.upload_queue.contains(&file) {
                    self.upload_queue.push(file.clone());
                }
                self.hashes.insert(file, Some(current));
                any_changed = true;
            }
        }
        Ok(any_changed)
    }

    /// Copy `path` into the backup directory, mirroring its path relative to
    /// the data root. Returns the backup location.
    pub fn backup_file(&self, path: &Path) -> Result<PathBuf> {
        let relative = path
            .strip_prefix(&self.root_dir)
            .wrap_err_with(|| format!("{} is outside the data root", path.display()))?;
        let backup_path = self.backup_dir().join(relative);
        if let Some(parent) = backup_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(path, &backup_path)
            .wrap_err_with(|| format!("Failed to back up {}", path.display()))?;
        Ok(backup_path)
    }

    /// Restore `path` from its backup, if one exists.
    pub fn restore_file(&self, path: &Path) -> Result<()> {
        let relative = path
            .strip_prefix(&self.root_dir)
            .wrap_err_with(|| format!("{} is outside the data root", path.display()))?;
        let backup_path = self.backup_dir().join(relative);
        if !backup_path.exists() {
            return Err(eyre!("No backup found for {}", path.display()));
        }
        fs::copy(&backup_path, path)
            .wrap_err_with(|| format!("Failed to restore {}", path.display()))?;
        Ok(())
    }
}

/// The `.tmp.parquet` sibling used for atomic writes.
pub fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp.parquet");
    target.with_file_name(name)
}

/// Atomically publish a fully-written temp file over its target. Rename is a
/// single filesystem operation on the same directory.
pub fn promote(tmp: &Path, target: &Path) -> Result<()> {
    fs::rename(tmp, target).wrap_err_with(|| {
        format!(
            "Failed to promote {} over {}",
            tmp.display(),
            target.display()
        )
    })
}

/// `path` itself when it is a `.parquet` file, or every `.parquet` descendant
/// when it is a partitioned directory. Missing paths yield nothing.
fn parquet_files_under(path: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !path.exists() {
        return Ok(files);
    }
    if path.is_file() {
        files.push(path.to_path_buf());
        return Ok(files);
    }
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let entry_path = entry.path();
            if entry_path.is_dir() {
                stack.push(entry_path);
            } else if entry_path.extension().is_some_and(|e| e == "parquet") {
                files.push(entry_path);
            }
        }
    }
    files.sort();
    Ok(files)
}
