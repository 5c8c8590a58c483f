//! Plain POSIX filesystem backend — the default, quota-less Volume.
//!
//! Adapted from the teacher's `demos/shadow_fs` NFS backend (tokio::fs usage,
//! spawn_blocking for permission bits, `map_io_error`-style conversion) and
//! from the original `BaseVFolderHost` for vfolder-level semantics: mangled
//! path creation/removal, `statvfs`-based `get_fs_usage`, and metadata storage
//! as a sibling file of the vfolder root.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::{StorageError, StorageResult};
use crate::path::{mangle, sanitize, validate_vfid};
use crate::scandir::{self, DirEntry};
use crate::stream::{read_stream, write_stream};
use crate::volume::{
    Capabilities, Capability, FsUsage, VFolderCreateOptions, VFolderUsage, Volume,
};

const METADATA_FILE: &str = "metadata.json";
const MAX_METADATA_BYTES: u64 = 10 * 1024 * 1024;
const UPLOAD_DIR: &str = ".upload";

pub struct PosixVolume {
    mount: PathBuf,
}

impl PosixVolume {
    pub fn new(mount: PathBuf) -> Self {
        Self { mount }
    }

    fn vfolder_path(&self, vfid: &str) -> StorageResult<PathBuf> {
        validate_vfid(vfid)?;
        Ok(mangle(&self.mount, vfid))
    }

    fn resolve(&self, vfid: &str, relpath: &str) -> StorageResult<PathBuf> {
        validate_vfid(vfid)?;
        sanitize(&self.mount, vfid, relpath)
    }

    /// Removes the two prefix directories above a vfolder path, each only if
    /// it is empty, walking from the immediate parent upward.
    async fn remove_empty_prefix_dirs(&self, vfid: &str) -> std::io::Result<()> {
        let mut dir = self.vfolder_path(vfid).expect("vfid validated by caller");
        for _ in 0..2 {
            dir = match dir.parent() {
                Some(parent) => parent.to_path_buf(),
                None => return Ok(()),
            };
            match tokio::fs::remove_dir(&dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                // directory not empty (or any other reason it can't be removed): stop
                Err(_) => return Ok(()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Volume for PosixVolume {
    fn capabilities(&self) -> Capabilities {
        Capabilities::new([Capability::Vfolder])
    }

    fn mount_path(&self) -> &Path {
        &self.mount
    }

    async fn create_vfolder(&self, vfid: &str, _options: VFolderCreateOptions) -> StorageResult<()> {
        let path = self.vfolder_path(vfid)?;
        if tokio::fs::try_exists(&path).await? {
            return Err(StorageError::VFolderAlreadyExists(vfid.to_owned()));
        }
        tokio::fs::create_dir_all(&path).await?;
        set_mode(&path, 0o755).await?;
        Ok(())
    }

    async fn delete_vfolder(&self, vfid: &str) -> StorageResult<()> {
        let path = self.vfolder_path(vfid)?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.remove_empty_prefix_dirs(vfid).await?;
        Ok(())
    }

    async fn put_metadata(&self, vfid: &str, payload: Bytes) -> StorageResult<()> {
        if payload.len() as u64 > MAX_METADATA_BYTES {
            return Err(StorageError::TooLarge(format!(
                "metadata of {} bytes exceeds {} byte limit",
                payload.len(),
                MAX_METADATA_BYTES
            )));
        }
        let path = self.vfolder_path(vfid)?.join(METADATA_FILE);
        tokio::fs::write(&path, &payload).await?;
        Ok(())
    }

    async fn get_metadata(&self, vfid: &str) -> StorageResult<Bytes> {
        let path = self.vfolder_path(vfid)?.join(METADATA_FILE);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.len() > MAX_METADATA_BYTES => {
                Err(StorageError::TooLarge(format!(
                    "stored metadata of {} bytes exceeds {} byte limit",
                    meta.len(),
                    MAX_METADATA_BYTES
                )))
            }
            Ok(_) => Ok(Bytes::from(tokio::fs::read(&path).await?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Bytes::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_fs_usage(&self) -> StorageResult<FsUsage> {
        let mount = self.mount.clone();
        tokio::task::spawn_blocking(move || statvfs_usage(&mount))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?
    }

    async fn get_usage(&self, vfid: &str, relpath: Option<&str>) -> StorageResult<VFolderUsage> {
        let base = match relpath {
            Some(rel) => self.resolve(vfid, rel)?,
            None => self.vfolder_path(vfid)?,
        };
        let (file_count, used_bytes) = scandir::usage(&base).await?;
        Ok(VFolderUsage { file_count, used_bytes })
    }

    fn scandir(
        &self,
        vfid: &str,
        relpath: &str,
        limit: usize,
    ) -> StorageResult<Box<dyn Stream<Item = std::io::Result<DirEntry>> + Send + Unpin>> {
        let dir = self.resolve(vfid, relpath)?;
        Ok(Box::new(scandir::scandir(dir, limit)))
    }

    async fn mkdir(&self, vfid: &str, relpath: &str, parents: bool) -> StorageResult<()> {
        let path = self.resolve(vfid, relpath)?;
        if tokio::fs::try_exists(&path).await? {
            return Err(StorageError::Io(std::io::Error::from(
                std::io::ErrorKind::AlreadyExists,
            )));
        }
        if parents {
            tokio::fs::create_dir_all(&path).await?;
        } else {
            tokio::fs::create_dir(&path).await?;
        }
        set_mode(&path, 0o755).await?;
        Ok(())
    }

    async fn rmdir(&self, vfid: &str, relpath: &str, recursive: bool) -> StorageResult<()> {
        let path = self.resolve(vfid, relpath)?;
        if recursive {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_dir(&path).await?;
        }
        Ok(())
    }

    async fn move_file(&self, vfid: &str, src: &str, dst: &str) -> StorageResult<()> {
        let src_path = self.resolve(vfid, src)?;
        let dst_path = self.resolve(vfid, dst)?;
        let meta = tokio::fs::symlink_metadata(&src_path).await?;
        if meta.is_dir() {
            return Err(StorageError::InvalidApiParameters(format!(
                "move_file source is a directory: {src}"
            )));
        }
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&src_path, &dst_path).await?;
        Ok(())
    }

    async fn move_tree(&self, vfid: &str, src: &str, dst: &str) -> StorageResult<()> {
        let src_path = self.resolve(vfid, src)?;
        let dst_path = self.resolve(vfid, dst)?;
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&src_path, &dst_path).await?;
        Ok(())
    }

    async fn copy_file(&self, vfid: &str, src: &str, dst: &str) -> StorageResult<()> {
        let src_path = self.resolve(vfid, src)?;
        let dst_path = self.resolve(vfid, dst)?;
        let meta = tokio::fs::symlink_metadata(&src_path).await?;
        if meta.is_dir() {
            return Err(StorageError::InvalidApiParameters(format!(
                "copy_file source is a directory: {src}"
            )));
        }
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src_path, &dst_path).await?;
        Ok(())
    }

    async fn add_file(
        &self,
        vfid: &str,
        relpath: &str,
        payload: Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Unpin>,
    ) -> StorageResult<u64> {
        let path = self.resolve(vfid, relpath)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let written = write_stream(&path, false, payload).await?;
        Ok(written)
    }

    fn read_file(
        &self,
        vfid: &str,
        relpath: &str,
        chunk_size: usize,
    ) -> StorageResult<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Unpin>> {
        let path = self.resolve(vfid, relpath)?;
        Ok(Box::new(read_stream(&path, chunk_size)))
    }

    async fn delete_files(
        &self,
        vfid: &str,
        relpaths: &[String],
        recursive: bool,
    ) -> StorageResult<()> {
        for relpath in relpaths {
            let path = self.resolve(vfid, relpath)?;
            let meta = tokio::fs::symlink_metadata(&path).await?;
            if meta.is_dir() {
                if recursive {
                    tokio::fs::remove_dir_all(&path).await?;
                } else {
                    tokio::fs::remove_dir(&path).await?;
                }
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    async fn prepare_upload(&self, vfid: &str) -> StorageResult<String> {
        let upload_dir = self.vfolder_path(vfid)?.join(UPLOAD_DIR);
        tokio::fs::create_dir_all(&upload_dir).await?;
        let session = uuid::Uuid::new_v4().simple().to_string();
        tokio::fs::File::create(upload_dir.join(&session)).await?;
        Ok(session)
    }
}

async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
    })
    .await
    .map_err(std::io::Error::other)?
}

fn statvfs_usage(mount: &Path) -> StorageResult<FsUsage> {
    let c_path = CString::new(mount.as_os_str().as_bytes())
        .map_err(|e| StorageError::Config(format!("invalid mount path: {e}")))?;
    // SAFETY: `statvfs` is called with a valid NUL-terminated path and a
    // zeroed, correctly-sized output struct that we immediately read from.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(StorageError::Io(std::io::Error::last_os_error()));
    }
    let frsize = stat.f_frsize as u64;
    Ok(FsUsage {
        capacity_bytes: frsize * stat.f_blocks as u64,
        used_bytes: frsize * (stat.f_blocks as u64 - stat.f_bavail as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn volume(dir: &tempfile::TempDir) -> PosixVolume {
        PosixVolume::new(dir.path().to_path_buf())
    }

    const VFID: &str = "82a6ba2b7b8e41deb5ee2c909ce34bcb";

    #[tokio::test]
    async fn create_then_delete_removes_prefix_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let vol = volume(&dir);

        vol.create_vfolder(VFID, VFolderCreateOptions::default()).await.unwrap();
        let mangled = mangle(dir.path(), VFID);
        assert!(mangled.exists());

        vol.delete_vfolder(VFID).await.unwrap();
        assert!(!mangled.exists());
        assert!(!dir.path().join(&VFID[0..2]).exists());
    }

    #[tokio::test]
    async fn create_vfolder_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let vol = volume(&dir);
        vol.create_vfolder(VFID, VFolderCreateOptions::default()).await.unwrap();
        let err = vol.create_vfolder(VFID, VFolderCreateOptions::default()).await.unwrap_err();
        assert!(matches!(err, StorageError::VFolderAlreadyExists(_)));
    }

    #[tokio::test]
    async fn metadata_round_trips_and_rejects_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let vol = volume(&dir);
        vol.create_vfolder(VFID, VFolderCreateOptions::default()).await.unwrap();

        assert_eq!(vol.get_metadata(VFID).await.unwrap(), Bytes::new());

        vol.put_metadata(VFID, Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(vol.get_metadata(VFID).await.unwrap(), Bytes::from_static(b"hello"));

        let big = Bytes::from(vec![0u8; (MAX_METADATA_BYTES + 1) as usize]);
        let err = vol.put_metadata(VFID, big).await.unwrap_err();
        assert!(matches!(err, StorageError::TooLarge(_)));
    }

    #[tokio::test]
    async fn usage_counts_files_in_vfolder() {
        let dir = tempfile::tempdir().unwrap();
        let vol = volume(&dir);
        vol.create_vfolder(VFID, VFolderCreateOptions::default()).await.unwrap();

        vol.add_file(VFID, "test.txt", Box::new(stream::iter(vec![Ok(Bytes::from_static(b"hello"))])))
            .await
            .unwrap();
        vol.mkdir(VFID, "inner", false).await.unwrap();
        vol.add_file(VFID, "inner/hello.txt", Box::new(stream::iter(vec![Ok(Bytes::from_static(b"abc"))])))
            .await
            .unwrap();
        vol.add_file(VFID, "inner/world.txt", Box::new(stream::iter(vec![Ok(Bytes::from_static(b"abc"))])))
            .await
            .unwrap();

        let usage = vol.get_usage(VFID, None).await.unwrap();
        assert_eq!(usage.file_count, 3);
        assert_eq!(usage.used_bytes, 11);
    }

    #[tokio::test]
    async fn sandbox_escape_is_rejected_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let vol = volume(&dir);
        vol.create_vfolder(VFID, VFolderCreateOptions::default()).await.unwrap();

        let err = vol.mkdir(VFID, "../../etc", false).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidApiParameters(_)));
        assert!(!dir.path().parent().unwrap().join("etc").exists());
    }

    #[tokio::test]
    async fn delete_files_stops_at_first_error() {
        let dir = tempfile::tempdir().unwrap();
        let vol = volume(&dir);
        vol.create_vfolder(VFID, VFolderCreateOptions::default()).await.unwrap();
        vol.add_file(VFID, "a.txt", Box::new(stream::iter(vec![Ok(Bytes::from_static(b"a"))])))
            .await
            .unwrap();

        let relpaths = vec!["a.txt".to_string(), "missing.txt".to_string()];
        let err = vol.delete_files(VFID, &relpaths, false).await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }
}
