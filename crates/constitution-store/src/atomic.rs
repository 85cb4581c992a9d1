//! Crash-safe file replacement with rotating backups.
//!
//! Writes go to a temp file in the target's directory, are fsynced, then
//! renamed over the target. A reader therefore observes either the previous
//! full content or the new full content, never a partial write. Before each
//! overwrite the previous content is copied into a rotating backup ring
//! (`<target>.bak.<n>`, generation numbers strictly increasing).

use crate::error::{StoreError, StoreResult};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes a single target file atomically and manages its backup ring.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    target: PathBuf,
    backup_retention: usize,
}

impl AtomicFileWriter {
    pub fn new(target: impl Into<PathBuf>, backup_retention: usize) -> Self {
        AtomicFileWriter {
            target: target.into(),
            backup_retention: backup_retention.max(1),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Replace the target's content atomically.
    ///
    /// If the target already exists, its current content is first copied to
    /// the next backup generation. Any failure before the final rename leaves
    /// the original target untouched; the temp file is cleaned up on drop.
    pub fn write(&self, bytes: &[u8]) -> StoreResult<()> {
        let dir = self.parent_dir()?;
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        if self.target.exists() {
            self.rotate_backup()?;
        }

        let file_name = self
            .target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                StoreError::invalid_input(format!("invalid target path: {}", self.target.display()))
            })?;

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{file_name}.tmp."))
            .tempfile_in(dir)
            .map_err(|e| StoreError::io(dir, e))?;
        tmp.write_all(bytes)
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(tmp.path(), e))?;

        tmp.persist(&self.target)
            .map_err(|e| StoreError::io(&self.target, e.error))?;

        self.sync_dir(dir)
    }

    /// Copy the most recent backup over the target, atomically.
    ///
    /// Returns the path of the backup that was restored, or `NotFound`-free
    /// `BackendCorrupt` when no backup exists to restore from.
    pub fn restore_latest_backup(&self) -> StoreResult<PathBuf> {
        let backup = self
            .latest_backup()?
            .ok_or_else(|| StoreError::BackendCorrupt {
                path: self.target.clone(),
            })?;
        let bytes = fs::read(&backup).map_err(|e| StoreError::io(&backup, e))?;

        // Reuse the temp-rename sequence, but without rotating a new backup
        // of the (known bad) current target.
        let dir = self.parent_dir()?;
        let file_name = self
            .target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                StoreError::invalid_input(format!("invalid target path: {}", self.target.display()))
            })?;
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{file_name}.tmp."))
            .tempfile_in(dir)
            .map_err(|e| StoreError::io(dir, e))?;
        tmp.write_all(&bytes)
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&self.target)
            .map_err(|e| StoreError::io(&self.target, e.error))?;
        self.sync_dir(dir)?;
        Ok(backup)
    }

    /// The most recent backup path, if any backups exist.
    pub fn latest_backup(&self) -> StoreResult<Option<PathBuf>> {
        Ok(self.backups()?.into_iter().last().map(|(_, p)| p))
    }

    /// All backup generations, oldest first.
    pub fn backups(&self) -> StoreResult<Vec<(u64, PathBuf)>> {
        let dir = self.parent_dir()?;
        let prefix = format!(
            "{}.bak.",
            self.target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );

        let mut found = Vec::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(gen_str) = name.strip_prefix(&prefix) {
                if let Ok(generation) = gen_str.parse::<u64>() {
                    found.push((generation, entry.path()));
                }
            }
        }
        found.sort_by_key(|(generation, _)| *generation);
        Ok(found)
    }

    fn rotate_backup(&self) -> StoreResult<()> {
        let backups = self.backups()?;
        let next_gen = backups.last().map(|(g, _)| g + 1).unwrap_or(1);
        let backup_path = self
            .target
            .with_file_name(format!(
                "{}.bak.{next_gen}",
                self.target
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ));
        fs::copy(&self.target, &backup_path).map_err(|e| StoreError::io(&backup_path, e))?;

        // Evict oldest generations beyond the retention ring.
        let mut all = backups;
        all.push((next_gen, backup_path));
        while all.len() > self.backup_retention {
            let (_, oldest) = all.remove(0);
            fs::remove_file(&oldest).map_err(|e| StoreError::io(&oldest, e))?;
        }
        Ok(())
    }

    fn parent_dir(&self) -> StoreResult<&Path> {
        let parent = self.target.parent().unwrap_or(Path::new("."));
        if parent.as_os_str().is_empty() {
            Ok(Path::new("."))
        } else {
            Ok(parent)
        }
    }

    #[cfg(unix)]
    fn sync_dir(&self, dir: &Path) -> StoreResult<()> {
        fs::File::open(dir)
            .and_then(|f| f.sync_all())
            .map_err(|e| StoreError::io(dir, e))
    }

    #[cfg(not(unix))]
    fn sync_dir(&self, _dir: &Path) -> StoreResult<()> {
        // Directory fsync is not available on this platform; the rename
        // itself is still atomic.
        Ok(())
    }
}
