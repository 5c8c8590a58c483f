//! tus.io upload-session staging: append-then-rename-on-complete.
//!
//! Ported from the original `tus_upload_part`: bytes are appended to a
//! staging file under `.upload/`, and once its size reaches the declared
//! total it is atomically renamed into place and the staging directory is
//! removed if (and only if) that leaves it empty.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::Stream;

use crate::error::StorageResult;
use crate::path::sanitize;
use crate::stream::write_stream;

const UPLOAD_DIR: &str = ".upload";

pub struct UploadOutcome {
    pub offset: u64,
    pub completed: bool,
}

fn staging_path(mount: &Path, vfid: &str, session: &str) -> PathBuf {
    crate::path::mangle(mount, vfid).join(UPLOAD_DIR).join(session)
}

/// Current on-disk size of a staging file, or `None` if it does not exist
/// (the client plane turns that into a 404 on HEAD).
pub async fn staged_offset(mount: &Path, vfid: &str, session: &str) -> std::io::Result<Option<u64>> {
    let path = staging_path(mount, vfid, session);
    match tokio::fs::metadata(&path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Appends `chunks` to the staging file for `session`, then commits to
/// `<vfolder>/<target_relpath>` if the declared size has been reached.
pub async fn append_and_maybe_commit(
    mount: &Path,
    vfid: &str,
    session: &str,
    target_relpath: &str,
    declared_size: u64,
    chunks: Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Unpin>,
) -> StorageResult<UploadOutcome> {
    let staging = staging_path(mount, vfid, session);
    write_stream(&staging, true, chunks).await?;

    let offset = tokio::fs::metadata(&staging).await?.len();
    let mut completed = false;

    if offset >= declared_size {
        let target = sanitize(mount, vfid, target_relpath)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&staging, &target).await?;
        completed = true;

        let upload_dir = crate::path::mangle(mount, vfid).join(UPLOAD_DIR);
        match tokio::fs::remove_dir(&upload_dir).await {
            Ok(()) | Err(_) => {} // NotEmpty (more sessions pending) is expected and ignored
        }
    }

    Ok(UploadOutcome { offset, completed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    const VFID: &str = "82a6ba2b7b8e41deb5ee2c909ce34bcb";

    #[tokio::test]
    async fn two_patches_complete_the_upload() {
        let dir = tempfile::tempdir().unwrap();
        let mount = dir.path();
        let vfolder = crate::path::mangle(mount, VFID);
        tokio::fs::create_dir_all(vfolder.join(".upload")).await.unwrap();
        tokio::fs::File::create(vfolder.join(".upload/sess1")).await.unwrap();

        let first = append_and_maybe_commit(
            mount,
            VFID,
            "sess1",
            "final.bin",
            20,
            Box::new(stream::iter(vec![Ok(Bytes::from(vec![1u8; 10]))])),
        )
        .await
        .unwrap();
        assert_eq!(first.offset, 10);
        assert!(!first.completed);

        let second = append_and_maybe_commit(
            mount,
            VFID,
            "sess1",
            "final.bin",
            20,
            Box::new(stream::iter(vec![Ok(Bytes::from(vec![2u8; 10]))])),
        )
        .await
        .unwrap();
        assert_eq!(second.offset, 20);
        assert!(second.completed);

        assert!(tokio::fs::metadata(vfolder.join("final.bin")).await.unwrap().len() == 20);
        assert!(tokio::fs::metadata(vfolder.join(".upload")).await.is_err());
    }

    #[tokio::test]
    async fn staged_offset_reports_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(staged_offset(dir.path(), VFID, "nope").await.unwrap(), None);
    }
}
