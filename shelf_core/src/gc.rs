//! Garbage collection.
//!
//! Reference counting deletes blobs as their last File row lets go of them.
//! What it cannot see are blobs left behind by a process that died between
//! writing a blob and committing the row, or blobs of channels that were
//! detached. A sweep over the shard directories finds those.

use crate::error::Result;
use crate::journal::{JournalEntry, Operation};
use crate::refcount::BlobKey;
use crate::store::ContentCopyStore;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Statistics from a garbage collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    /// Number of blobs deleted (or that would be, on a dry run).
    pub blobs_deleted: usize,
    /// Bytes freed.
    pub bytes_freed: u64,
}

/// A blob on disk that no attached File row references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Orphan {
    pub blob: String,
    /// Path relative to the store root.
    pub path: String,
    pub size: u64,
}

impl ContentCopyStore {
    /// Run garbage collection.
    ///
    /// Deletes every blob whose key has no reference, then removes empty
    /// shard directories. If `dry_run` is true, reports what would be
    /// deleted without deleting.
    pub fn gc(&self, dry_run: bool) -> Result<GcStats> {
        let mut stats = GcStats::default();

        for (key, path) in self.scan_blobs()? {
            let size = match fs::metadata(&path) {
                Ok(meta) => meta.len(),
                // released concurrently since the scan
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            let removed = if dry_run {
                !self.refs().is_referenced(&key)
            } else {
                self.refs().with_unreferenced(&key, || match fs::remove_file(&path) {
                    Ok(()) => {
                        self.prune_shards(&path);
                        Ok(true)
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                    Err(e) => Err(e.into()),
                })? == Some(true)
            };

            if removed {
                stats.blobs_deleted += 1;
                stats.bytes_freed += size;
                if !dry_run {
                    info!(blob = %key, size, "collected unreferenced content copy");
                    self.record(&JournalEntry::now(
                        Operation::Gc,
                        &key,
                        format!("size={}", size),
                    ));
                }
            }
        }

        if !dry_run {
            self.remove_empty_shards()?;
        }

        debug!(?stats, dry_run, "gc finished");
        Ok(stats)
    }

    /// List unreferenced blobs without deleting them.
    pub fn orphans(&self) -> Result<Vec<Orphan>> {
        let mut orphans = Vec::new();
        for (key, path) in self.scan_blobs()? {
            if self.refs().is_referenced(&key) {
                continue;
            }
            orphans.push(Orphan {
                path: self.relative_path(&key),
                size: fs::metadata(&path)?.len(),
                blob: key.name(),
            });
        }
        orphans.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(orphans)
    }

    /// Every blob file under the shard directories.
    ///
    /// Files whose name or location does not match a blob key are skipped.
    fn scan_blobs(&self) -> Result<Vec<(BlobKey, PathBuf)>> {
        let mut blobs = Vec::new();

        for first in shard_dirs(self.root())? {
            for second in shard_dirs(&first)? {
                for entry in fs::read_dir(&second)? {
                    let path = entry?.path();
                    if !path.is_file() {
                        continue;
                    }
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    match BlobKey::from_name(name) {
                        Ok(key) if self.blob_path(&key) == path => blobs.push((key, path)),
                        _ => debug!(path = %path.display(), "skipping non-blob file"),
                    }
                }
            }
        }

        Ok(blobs)
    }

    fn remove_empty_shards(&self) -> Result<()> {
        for first in shard_dirs(self.root())? {
            for second in shard_dirs(&first)? {
                if let Ok(mut entries) = fs::read_dir(&second)
                    && entries.next().is_none()
                {
                    let _ = fs::remove_dir(&second);
                }
            }
            if let Ok(mut entries) = fs::read_dir(&first)
                && entries.next().is_none()
            {
                let _ = fs::remove_dir(&first);
            }
        }
        Ok(())
    }
}

/// Subdirectories of `dir` named by a single lowercase hex digit.
fn shard_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_shard = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.len() == 1 && n.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        if is_shard && path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}
