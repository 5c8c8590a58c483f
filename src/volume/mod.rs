//! The `Volume` contract and the router that resolves a configured name to one.
//!
//! Each backend embeds or wraps another rather than inheriting from it —
//! `XfsVolume` holds a `PosixVolume` and delegates to it for everything it
//! does not specialize. Capability is a set callers check before calling an
//! operation that might not be supported, not a type-level distinction.

pub mod posix;
pub mod xfs;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::config::VolumeConfig;
use crate::error::{StorageError, StorageResult};
use crate::scandir::DirEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Vfolder,
    Quota,
    Metric,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Capabilities(Vec<Capability>);

impl Capabilities {
    pub fn new(caps: impl IntoIterator<Item = Capability>) -> Self {
        Self(caps.into_iter().collect())
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    pub fn as_slice(&self) -> &[Capability] {
        &self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct VFolderCreateOptions {
    pub quota: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FsUsage {
    pub capacity_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VFolderUsage {
    pub file_count: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerformanceMetric {
    pub iops_read: u64,
    pub iops_write: u64,
    pub io_bytes_read: u64,
    pub io_bytes_write: u64,
    pub io_usec_read: u64,
    pub io_usec_write: u64,
}

/// The operation set every backend implements, matching the original
/// `AbstractVFolderHost` method list 1:1 (see DESIGN.md).
#[async_trait]
pub trait Volume: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn mount_path(&self) -> &std::path::Path;

    fn vfolder_mount(&self, vfid: &str) -> StorageResult<PathBuf> {
        crate::path::validate_vfid(vfid)?;
        Ok(crate::path::mangle(self.mount_path(), vfid))
    }

    async fn create_vfolder(&self, vfid: &str, options: VFolderCreateOptions) -> StorageResult<()>;

    async fn delete_vfolder(&self, vfid: &str) -> StorageResult<()>;

    async fn clone_vfolder(&self, src_vfid: &str, new_vfid: &str) -> StorageResult<()> {
        let _ = (src_vfid, new_vfid);
        Err(StorageError::Unsupported("clone_vfolder"))
    }

    async fn put_metadata(&self, vfid: &str, payload: Bytes) -> StorageResult<()>;

    async fn get_metadata(&self, vfid: &str) -> StorageResult<Bytes>;

    async fn get_quota(&self, vfid: &str) -> StorageResult<u64> {
        let _ = vfid;
        Err(StorageError::Unsupported("get_quota"))
    }

    async fn set_quota(&self, vfid: &str, size_bytes: u64) -> StorageResult<()> {
        let _ = (vfid, size_bytes);
        Err(StorageError::Unsupported("set_quota"))
    }

    async fn get_performance_metric(&self) -> StorageResult<PerformanceMetric> {
        Err(StorageError::Unsupported("get_performance_metric"))
    }

    async fn get_fs_usage(&self) -> StorageResult<FsUsage>;

    async fn get_usage(&self, vfid: &str, relpath: Option<&str>) -> StorageResult<VFolderUsage>;

    fn scandir(
        &self,
        vfid: &str,
        relpath: &str,
        limit: usize,
    ) -> StorageResult<Box<dyn Stream<Item = std::io::Result<DirEntry>> + Send + Unpin>>;

    async fn mkdir(&self, vfid: &str, relpath: &str, parents: bool) -> StorageResult<()>;

    async fn rmdir(&self, vfid: &str, relpath: &str, recursive: bool) -> StorageResult<()>;

    async fn move_file(&self, vfid: &str, src: &str, dst: &str) -> StorageResult<()>;

    async fn move_tree(&self, vfid: &str, src: &str, dst: &str) -> StorageResult<()>;

    async fn copy_file(&self, vfid: &str, src: &str, dst: &str) -> StorageResult<()>;

    async fn add_file(
        &self,
        vfid: &str,
        relpath: &str,
        payload: Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Unpin>,
    ) -> StorageResult<u64>;

    fn read_file(
        &self,
        vfid: &str,
        relpath: &str,
        chunk_size: usize,
    ) -> StorageResult<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Unpin>>;

    async fn delete_files(
        &self,
        vfid: &str,
        relpaths: &[String],
        recursive: bool,
    ) -> StorageResult<()>;

    async fn prepare_upload(&self, vfid: &str) -> StorageResult<String>;
}

pub struct VolumeEntry {
    pub name: String,
    pub backend: String,
    pub fsprefix: String,
    pub instance: Arc<dyn Volume>,
}

/// Resolves a configured volume name to its instance. Construction happens
/// once at startup; `get` is a cheap lookup plus clone of an `Arc`.
pub struct VolumeRouter {
    volumes: BTreeMap<String, VolumeEntry>,
}

impl VolumeRouter {
    pub fn from_config(configs: &BTreeMap<String, VolumeConfig>) -> StorageResult<Self> {
        let mut volumes = BTreeMap::new();
        for (name, cfg) in configs {
            let instance: Arc<dyn Volume> = match cfg.backend.as_str() {
                "posix" => Arc::new(posix::PosixVolume::new(PathBuf::from(&cfg.path))),
                "xfs" => Arc::new(xfs::XfsVolume::new(PathBuf::from(&cfg.path))?),
                other => {
                    return Err(StorageError::Config(format!(
                        "volume '{name}' names unknown backend '{other}'"
                    )))
                }
            };
            volumes.insert(
                name.clone(),
                VolumeEntry {
                    name: name.clone(),
                    backend: cfg.backend.clone(),
                    fsprefix: cfg.fsprefix.clone(),
                    instance,
                },
            );
        }
        Ok(Self { volumes })
    }

    pub fn get(&self, name: &str) -> StorageResult<Arc<dyn Volume>> {
        self.volumes
            .get(name)
            .map(|entry| entry.instance.clone())
            .ok_or_else(|| StorageError::InvalidVolume(name.to_owned()))
    }

    pub fn list(&self) -> impl Iterator<Item = &VolumeEntry> {
        self.volumes.values()
    }
}
