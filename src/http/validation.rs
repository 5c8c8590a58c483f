//! Per-endpoint request schemas.
//!
//! The original validated bodies with `trafaret` type dictionaries; this is
//! the same idea translated to `serde`'s derive plus the explicit relpath and
//! size checks `serde` alone cannot express.

use std::path::{Component, Path};

use serde::Deserialize;

use crate::error::{StorageError, StorageResult};
use crate::path::validate_vfid;
use crate::volume::VFolderCreateOptions;

/// Structural relpath checks, ahead of the mount-aware containment check
/// `path::sanitize` does later: rejects empty, absolute, and `..`-bearing
/// relpaths before any I/O is attempted.
fn check_relpath(relpath: &str) -> StorageResult<()> {
    if relpath.is_empty() {
        return Err(StorageError::InvalidApiParameters("relpath must not be empty".into()));
    }
    for component in Path::new(relpath).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::InvalidApiParameters(format!(
                    "relpath must be a relative path with no parent-directory components: {relpath}"
                )));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreateVFolderOptions {
    pub quota: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateVFolderRequest {
    pub volume: String,
    pub vfid: String,
    #[serde(default)]
    pub options: Option<CreateVFolderOptions>,
}

impl CreateVFolderRequest {
    pub fn validate(&self) -> StorageResult<VFolderCreateOptions> {
        validate_vfid(&self.vfid)?;
        Ok(VFolderCreateOptions { quota: self.options.as_ref().and_then(|o| o.quota) })
    }
}

#[derive(Debug, Deserialize)]
pub struct VFolderRequest {
    pub volume: String,
    pub vfid: String,
}

impl VFolderRequest {
    pub fn validate(&self) -> StorageResult<()> {
        validate_vfid(&self.vfid)
    }
}

#[derive(Debug, Deserialize)]
pub struct CloneVFolderRequest {
    pub volume: String,
    pub src_vfid: String,
    pub new_vfid: String,
}

impl CloneVFolderRequest {
    pub fn validate(&self) -> StorageResult<()> {
        validate_vfid(&self.src_vfid)?;
        validate_vfid(&self.new_vfid)
    }
}

#[derive(Debug, Deserialize)]
pub struct MetadataRequest {
    pub volume: String,
    pub vfid: String,
    #[serde(default)]
    pub payload: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UsageRequest {
    pub volume: String,
    pub vfid: String,
    #[serde(default)]
    pub relpath: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PerformanceMetricRequest {
    pub volume: String,
}

#[derive(Debug, Deserialize)]
pub struct MkdirRequest {
    pub volume: String,
    pub vfid: String,
    pub relpath: String,
    #[serde(default = "default_true")]
    pub parents: bool,
}

fn default_true() -> bool {
    true
}

impl MkdirRequest {
    pub fn validate(&self) -> StorageResult<()> {
        validate_vfid(&self.vfid)?;
        check_relpath(&self.relpath)
    }
}

#[derive(Debug, Deserialize)]
pub struct ListRequest {
    pub volume: String,
    pub vfid: String,
    #[serde(default)]
    pub relpath: String,
}

impl ListRequest {
    pub fn validate(&self) -> StorageResult<()> {
        validate_vfid(&self.vfid)
    }
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub volume: String,
    pub vfid: String,
    pub relpath: String,
    pub new_name: String,
}

impl RenameRequest {
    pub fn validate(&self) -> StorageResult<()> {
        validate_vfid(&self.vfid)?;
        check_relpath(&self.relpath)?;
        check_relpath(&self.new_name)
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub volume: String,
    pub vfid: String,
    pub relpath: String,
    #[serde(default)]
    pub archive: bool,
}

impl DownloadRequest {
    pub fn validate(&self) -> StorageResult<()> {
        validate_vfid(&self.vfid)?;
        check_relpath(&self.relpath)
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub volume: String,
    pub vfid: String,
    pub relpath: String,
    pub size: u64,
}

impl UploadRequest {
    pub fn validate(&self, max_upload_size: u64) -> StorageResult<()> {
        validate_vfid(&self.vfid)?;
        check_relpath(&self.relpath)?;
        if self.size > max_upload_size {
            return Err(StorageError::TooLarge(format!(
                "upload of {} bytes exceeds configured maximum of {max_upload_size}",
                self.size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteFilesRequest {
    pub volume: String,
    pub vfid: String,
    pub relpaths: Vec<String>,
    #[serde(default)]
    pub recursive: bool,
}

impl DeleteFilesRequest {
    pub fn validate(&self) -> StorageResult<()> {
        validate_vfid(&self.vfid)?;
        if self.relpaths.is_empty() {
            return Err(StorageError::InvalidApiParameters("relpaths must not be empty".into()));
        }
        for relpath in &self.relpaths {
            check_relpath(relpath)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_rejects_malformed_vfid() {
        let req = CreateVFolderRequest {
            volume: "local".into(),
            vfid: "not-a-vfid".into(),
            options: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn upload_request_rejects_oversized_declared_size() {
        let req = UploadRequest {
            volume: "local".into(),
            vfid: "82a6ba2b7b8e41deb5ee2c909ce34bcb".into(),
            relpath: "big.bin".into(),
            size: 200,
        };
        assert!(req.validate(100).is_err());
        assert!(req.validate(1000).is_ok());
    }

    #[test]
    fn mkdir_request_rejects_parent_escape() {
        let req = MkdirRequest {
            volume: "local".into(),
            vfid: "82a6ba2b7b8e41deb5ee2c909ce34bcb".into(),
            relpath: "../../etc".into(),
            parents: true,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn mkdir_request_rejects_absolute_relpath() {
        let req = MkdirRequest {
            volume: "local".into(),
            vfid: "82a6ba2b7b8e41deb5ee2c909ce34bcb".into(),
            relpath: "/etc/passwd".into(),
            parents: true,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn delete_files_rejects_empty_list() {
        let req = DeleteFilesRequest {
            volume: "local".into(),
            vfid: "82a6ba2b7b8e41deb5ee2c909ce34bcb".into(),
            relpaths: vec![],
            recursive: false,
        };
        assert!(req.validate().is_err());
    }
}
