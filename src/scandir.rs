//! Lazy, size-capped directory listing.
//!
//! One pass over a single directory, one `lstat` per entry, fed through the
//! same bounded-channel shape as the stream bridge so a cancelled consumer
//! stops the scan promptly instead of walking the whole tree regardless.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

use crate::error::StorageResult;

const CHANNEL_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryStat {
    pub size: u64,
    pub owner: u32,
    pub mode: u32,
    pub modified: i64,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub stat: EntryStat,
    pub symlink_target: Option<String>,
}

/// Scans `dir` (already sanitized by the caller), emitting at most `limit`
/// entries. `limit == 0` means unbounded, matching the original convention.
pub fn scandir(dir: PathBuf, limit: usize) -> impl Stream<Item = std::io::Result<DirEntry>> {
    let (tx, rx) = mpsc::channel::<std::io::Result<DirEntry>>(CHANNEL_DEPTH);

    tokio::task::spawn_blocking(move || {
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                return;
            }
        };

        let mut emitted = 0usize;
        for item in read_dir {
            if limit != 0 && emitted >= limit {
                break;
            }
            let item = match item {
                Ok(item) => item,
                Err(err) => {
                    let _ = tx.blocking_send(Err(err));
                    break;
                }
            };
            match entry_from_dir_entry(&item) {
                Ok(entry) => {
                    emitted += 1;
                    if tx.blocking_send(Ok(entry)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.blocking_send(Err(err));
                    break;
                }
            }
        }
    });

    ReceiverStream::new(rx)
}

fn entry_from_dir_entry(item: &std::fs::DirEntry) -> std::io::Result<DirEntry> {
    let path = item.path();
    let meta = std::fs::symlink_metadata(&path)?;
    let entry_type = if meta.is_symlink() {
        EntryType::Symlink
    } else if meta.is_dir() {
        EntryType::Directory
    } else {
        EntryType::File
    };
    let symlink_target = if entry_type == EntryType::Symlink {
        std::fs::read_link(&path).ok().map(|p| p.to_string_lossy().into_owned())
    } else {
        None
    };
    Ok(DirEntry {
        name: item.file_name().to_string_lossy().into_owned(),
        path: path.to_string_lossy().into_owned(),
        entry_type,
        stat: EntryStat {
            size: meta.size(),
            owner: meta.uid(),
            mode: meta.mode(),
            modified: meta.mtime(),
            created: meta.ctime(),
        },
        symlink_target,
    })
}

/// Recursively sums file and symlink sizes under `root`, matching the
/// original's `os.scandir` + `stat(follow_symlinks=False)` walk.
pub async fn usage(root: &Path) -> StorageResult<(u64, u64)> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk_usage(&root))
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?
        .map_err(Into::into)
}

fn walk_usage(dir: &Path) -> std::io::Result<(u64, u64)> {
    let mut file_count = 0u64;
    let mut used_bytes = 0u64;
    for item in std::fs::read_dir(dir)? {
        let item = item?;
        let meta = std::fs::symlink_metadata(item.path())?;
        if meta.is_dir() {
            let (sub_count, sub_bytes) = walk_usage(&item.path())?;
            file_count += sub_count;
            used_bytes += sub_bytes;
        } else {
            file_count += 1;
            used_bytes += meta.size();
        }
    }
    Ok((file_count, used_bytes))
}
