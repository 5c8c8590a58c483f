//! XFS-backed Volume: adds per-vfolder project quotas on top of `PosixVolume`.
//!
//! Ported from the original `XfsVolume`: creation registers a project and
//! sets its quota (rolling the vfolder back on any failure), deletion zeroes
//! the quota before removing the registry entry and the directory tree, and
//! quota/usage queries shell out to `xfs_quota`.

pub mod registry;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::process::Command;

use crate::error::{StorageError, StorageResult};
use crate::scandir::DirEntry;
use crate::volume::posix::PosixVolume;
use crate::volume::{
    Capabilities, Capability, FsUsage, VFolderCreateOptions, VFolderUsage, Volume,
};
use registry::ProjectRegistry;

pub struct XfsVolume {
    posix: PosixVolume,
    mount: PathBuf,
    registry: ProjectRegistry,
}

impl XfsVolume {
    pub fn new(mount: PathBuf) -> StorageResult<Self> {
        Ok(Self { posix: PosixVolume::new(mount.clone()), mount, registry: ProjectRegistry::new() })
    }

    async fn run_quota(&self, args: &str, vfid: &str) -> StorageResult<std::process::Output> {
        let output = Command::new("xfs_quota")
            .arg("-x")
            .arg("-c")
            .arg(args)
            .arg(&self.mount)
            .output()
            .await?;
        if !output.status.success() {
            return Err(StorageError::ExecutionError(format!(
                "xfs_quota -c '{args}' {} failed for {vfid}: {}",
                self.mount.display(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(output)
    }

    async fn mark_project(&self, vfid: &str) -> StorageResult<()> {
        self.run_quota(&format!("project -s {vfid}"), vfid).await?;
        Ok(())
    }

    async fn set_quota_inner(&self, vfid: &str, size_bytes: u64) -> StorageResult<()> {
        self.run_quota(&format!("limit -p bsoft={size_bytes} bhard={size_bytes} {vfid}"), vfid)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Volume for XfsVolume {
    fn capabilities(&self) -> Capabilities {
        Capabilities::new([Capability::Vfolder, Capability::Quota])
    }

    fn mount_path(&self) -> &Path {
        self.posix.mount_path()
    }

    async fn create_vfolder(&self, vfid: &str, options: VFolderCreateOptions) -> StorageResult<()> {
        self.posix.create_vfolder(vfid, VFolderCreateOptions::default()).await?;

        if let Some(quota) = options.quota.filter(|q| *q > 0) {
            let mangled = self.posix.vfolder_mount(vfid)?;
            let result: StorageResult<()> = async {
                self.registry.add_project(vfid, &mangled, None).await?;
                self.mark_project(vfid).await?;
                self.set_quota_inner(vfid, quota).await?;
                Ok(())
            }
            .await;

            if let Err(err) = result {
                let _ = self.registry.remove_project(vfid).await;
                let _ = self.posix.delete_vfolder(vfid).await;
                return Err(StorageError::VFolderCreationError(err.to_string()));
            }
        }
        Ok(())
    }

    async fn delete_vfolder(&self, vfid: &str) -> StorageResult<()> {
        if self.registry.project_id_for(vfid).await?.is_some() {
            let _ = self.set_quota_inner(vfid, 0).await;
            self.registry.remove_project(vfid).await?;
        }
        self.posix.delete_vfolder(vfid).await
    }

    async fn clone_vfolder(&self, src_vfid: &str, new_vfid: &str) -> StorageResult<()> {
        self.posix.clone_vfolder(src_vfid, new_vfid).await
    }

    async fn put_metadata(&self, vfid: &str, payload: Bytes) -> StorageResult<()> {
        self.posix.put_metadata(vfid, payload).await
    }

    async fn get_metadata(&self, vfid: &str) -> StorageResult<Bytes> {
        self.posix.get_metadata(vfid).await
    }

    async fn get_quota(&self, vfid: &str) -> StorageResult<u64> {
        if self.registry.project_id_for(vfid).await?.is_none() {
            return Err(StorageError::VFolderNotFound(vfid.to_owned()));
        }
        let output = self.run_quota("report -h", vfid).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let Some(proj_name) = fields.first() else { continue };
            if vfid.starts_with(proj_name) && fields.len() >= 4 {
                return parse_size(fields[3]).ok_or_else(|| {
                    StorageError::ExecutionError(format!("unexpected xfs_quota report line: {line}"))
                });
            }
        }
        Err(StorageError::ExecutionError(format!(
            "xfs_quota report contained no line for {vfid}"
        )))
    }

    async fn set_quota(&self, vfid: &str, size_bytes: u64) -> StorageResult<()> {
        if self.registry.project_id_for(vfid).await?.is_none() {
            self.mark_project(vfid).await?;
        }
        self.set_quota_inner(vfid, size_bytes).await
    }

    async fn get_performance_metric(
        &self,
    ) -> StorageResult<crate::volume::PerformanceMetric> {
        self.posix.get_performance_metric().await
    }

    async fn get_fs_usage(&self) -> StorageResult<FsUsage> {
        self.posix.get_fs_usage().await
    }

    async fn get_usage(&self, vfid: &str, relpath: Option<&str>) -> StorageResult<VFolderUsage> {
        self.posix.get_usage(vfid, relpath).await
    }

    fn scandir(
        &self,
        vfid: &str,
        relpath: &str,
        limit: usize,
    ) -> StorageResult<Box<dyn Stream<Item = std::io::Result<DirEntry>> + Send + Unpin>> {
        self.posix.scandir(vfid, relpath, limit)
    }

    async fn mkdir(&self, vfid: &str, relpath: &str, parents: bool) -> StorageResult<()> {
        self.posix.mkdir(vfid, relpath, parents).await
    }

    async fn rmdir(&self, vfid: &str, relpath: &str, recursive: bool) -> StorageResult<()> {
        self.posix.rmdir(vfid, relpath, recursive).await
    }

    async fn move_file(&self, vfid: &str, src: &str, dst: &str) -> StorageResult<()> {
        self.posix.move_file(vfid, src, dst).await
    }

    async fn move_tree(&self, vfid: &str, src: &str, dst: &str) -> StorageResult<()> {
        self.posix.move_tree(vfid, src, dst).await
    }

    async fn copy_file(&self, vfid: &str, src: &str, dst: &str) -> StorageResult<()> {
        self.posix.copy_file(vfid, src, dst).await
    }

    async fn add_file(
        &self,
        vfid: &str,
        relpath: &str,
        payload: Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Unpin>,
    ) -> StorageResult<u64> {
        self.posix.add_file(vfid, relpath, payload).await
    }

    fn read_file(
        &self,
        vfid: &str,
        relpath: &str,
        chunk_size: usize,
    ) -> StorageResult<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Unpin>> {
        self.posix.read_file(vfid, relpath, chunk_size)
    }

    async fn delete_files(
        &self,
        vfid: &str,
        relpaths: &[String],
        recursive: bool,
    ) -> StorageResult<()> {
        self.posix.delete_files(vfid, relpaths, recursive).await
    }

    async fn prepare_upload(&self, vfid: &str) -> StorageResult<String> {
        self.posix.prepare_upload(vfid).await
    }
}

/// Parses an `xfs_quota report -h` size field (e.g. `10M`, `1.5G`, `512`,
/// bare bytes with no suffix) into a byte count, K/M/G/T = 1024^n.
fn parse_size(field: &str) -> Option<u64> {
    let field = field.trim();
    match field.chars().last() {
        Some(last) if last.is_ascii_alphabetic() => {
            let (number, unit) = field.split_at(field.len() - 1);
            let multiplier: u64 = match unit.to_ascii_uppercase().as_str() {
                "K" => 1024,
                "M" => 1024 * 1024,
                "G" => 1024 * 1024 * 1024,
                "T" => 1024 * 1024 * 1024 * 1024,
                "B" => 1,
                _ => return None,
            };
            let value: f64 = number.parse().ok()?;
            Some((value * multiplier as f64).round() as u64)
        }
        _ => field.parse::<u64>().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::registry::ProjectRegistry;
    use super::parse_size;

    // xfs_quota and /etc/projects are not available in a test sandbox; the
    // registry's pure logic is covered in registry::tests, and the quota
    // subprocess plumbing here is exercised by integration tests on real XFS
    // hosts (outside this crate's test suite).
    #[test]
    fn registry_constructs_with_custom_paths() {
        let _ = ProjectRegistry::at("/tmp/does-not-matter", "/tmp/also-not", "/tmp/lock-not");
    }

    #[test]
    fn parse_size_reads_binary_suffixes() {
        assert_eq!(parse_size("10M"), Some(10 * 1024 * 1024));
        assert_eq!(parse_size("1.5G"), Some((1.5 * 1024.0 * 1024.0 * 1024.0) as u64));
        assert_eq!(parse_size("512K"), Some(512 * 1024));
        assert_eq!(parse_size("1T"), Some(1024u64 * 1024 * 1024 * 1024));
    }

    #[test]
    fn parse_size_reads_bare_bytes() {
        assert_eq!(parse_size("10485760"), Some(10_485_760));
    }

    #[test]
    fn parse_size_rejects_unknown_unit() {
        assert_eq!(parse_size("10X"), None);
    }
}
